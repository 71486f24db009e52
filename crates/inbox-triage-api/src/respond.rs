use inbox_triage_core::{Category, Priority, Record, Sentiment};

/// Drafts a reply for a record. Implementations may be slow or remote; the service treats the
/// output as an opaque text blob.
pub trait ResponseGenerator: Send + Sync {
    /// # Errors
    /// Implementations return an error when no draft could be produced.
    fn generate(&self, record: &Record) -> anyhow::Result<String>;
}

/// Deterministic reply assembled from fixed paragraphs keyed on the record's labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateResponder;

fn salutation(record: &Record) -> String {
    if let Some(name) = record.extracted.names.iter().next() {
        return format!("Dear {name},");
    }
    match record.sender.split('@').next().filter(|local| !local.is_empty()) {
        Some(local) => format!("Dear {local},"),
        None => "Dear Customer,".to_string(),
    }
}

fn category_paragraph(record: &Record) -> String {
    match record.category {
        Category::Account => "We have received your request about your account. For sign-in \
            problems, please try resetting your password from the login page; if that does not \
            help, reply to this message and we will verify your identity and restore access."
            .to_string(),
        Category::Billing => "We have received your billing inquiry. Our billing specialists \
            will review the charges on your account and follow up with a clear explanation or a \
            correction where one is due."
            .to_string(),
        Category::Technical => "We have received your report of a technical problem. Our \
            engineers will reproduce the issue and come back to you with a fix or a workaround. \
            Screenshots and the steps that led to the error help us move faster."
            .to_string(),
        Category::Feature => "Thank you for the suggestion. We have shared it with our product \
            team, who review every request when planning upcoming work."
            .to_string(),
        Category::General => format!(
            "We have received your message regarding \"{}\". Our team is reviewing it and will \
             reply with a detailed answer as soon as possible.",
            record.subject.trim()
        ),
    }
}

fn sentiment_paragraph(sentiment: Sentiment) -> Option<&'static str> {
    match sentiment {
        Sentiment::Negative => Some(
            "We are sorry for the trouble this has caused. We take your concerns seriously and \
             will keep working on this until it is resolved.",
        ),
        Sentiment::Positive => {
            Some("Thank you for the kind words; we are glad to hear about your experience.")
        }
        Sentiment::Neutral => None,
    }
}

fn priority_paragraph(priority: Priority) -> Option<&'static str> {
    match priority {
        Priority::Urgent => Some(
            "This has been marked urgent and escalated to a senior team member, who will \
             contact you within 2 hours.",
        ),
        Priority::High => Some(
            "This has been marked as a priority case and we will follow up within one business \
             day.",
        ),
        Priority::Medium | Priority::Low => None,
    }
}

impl ResponseGenerator for TemplateResponder {
    fn generate(&self, record: &Record) -> anyhow::Result<String> {
        let mut paragraphs = vec![
            salutation(record),
            "Thank you for contacting our support team.".to_string(),
            category_paragraph(record),
        ];
        paragraphs.extend(sentiment_paragraph(record.sentiment).map(str::to_string));
        paragraphs.extend(priority_paragraph(record.priority).map(str::to_string));
        paragraphs.push("Best regards,\nSupport Team".to_string());
        Ok(paragraphs.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inbox_triage_core::{Normalizer, RawRecord};
    use time::macros::datetime;

    fn record(sender: &str, subject: &str, body: &str) -> Record {
        Normalizer::default().normalize(RawRecord::new(
            1,
            sender,
            subject,
            body,
            datetime!(2024-03-15 10:00:00 UTC),
        ))
    }

    #[test]
    fn negative_billing_reply_apologizes() -> anyhow::Result<()> {
        let text = TemplateResponder.generate(&record(
            "pat@example.com",
            "Payment problem",
            "I was charged twice and the refund failed",
        ))?;

        assert!(text.starts_with("Dear pat,"));
        assert!(text.contains("billing inquiry"));
        assert!(text.contains("We are sorry"));
        assert!(text.ends_with("Support Team"));
        Ok(())
    }

    #[test]
    fn signature_name_wins_over_sender_address() -> anyhow::Result<()> {
        let mut urgent = record("x9@example.com", "Hello", "Quick note.\n\nRegards,\nDana Price");
        urgent.priority = Priority::Urgent;

        let text = TemplateResponder.generate(&urgent)?;

        assert!(text.starts_with("Dear Dana Price,"));
        assert!(text.contains("regarding \"Hello\""));
        assert!(text.contains("within 2 hours"));
        Ok(())
    }
}
