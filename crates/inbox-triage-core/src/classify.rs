//! Lexicon classifier.
//!
//! Each label is a total function: lexicons are checked in order, the first one with any term
//! contained in the lowercased text wins, and a fixed default applies otherwise.

use serde::{Deserialize, Serialize};

use crate::{Category, Priority, Sentiment};

const HIGH_PRIORITY_TERMS: &[&str] = &["urgent", "critical", "immediate"];
const MEDIUM_PRIORITY_TERMS: &[&str] = &["help", "support"];

const NEGATIVE_TERMS: &[&str] = &["error", "issue", "problem", "cannot", "failed"];
const POSITIVE_TERMS: &[&str] = &["thank", "appreciate", "great", "good"];

const CATEGORY_LEXICONS: &[(Category, &[&str])] = &[
    (Category::Account, &["login", "password", "account"]),
    (Category::Billing, &["billing", "payment", "charged", "refund", "pricing"]),
    (Category::Technical, &["technical", "error", "bug", "issue"]),
    (Category::Feature, &["feature", "enhancement", "suggestion"]),
];

fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| haystack.contains(term))
}

fn present(text: Option<&str>) -> Option<&str> {
    text.filter(|value| !value.trim().is_empty())
}

/// Priority from the subject line. Never yields [`Priority::Urgent`]; that label only arrives
/// with source data or an explicit edit.
#[must_use]
pub fn priority(subject: Option<&str>) -> Priority {
    let Some(subject) = present(subject) else {
        return Priority::Medium;
    };
    let subject = subject.to_lowercase();
    if contains_any(&subject, HIGH_PRIORITY_TERMS) {
        Priority::High
    } else if contains_any(&subject, MEDIUM_PRIORITY_TERMS) {
        Priority::Medium
    } else {
        Priority::Low
    }
}

#[must_use]
pub fn sentiment(body: Option<&str>) -> Sentiment {
    let Some(body) = present(body) else {
        return Sentiment::Neutral;
    };
    let body = body.to_lowercase();
    if contains_any(&body, NEGATIVE_TERMS) {
        Sentiment::Negative
    } else if contains_any(&body, POSITIVE_TERMS) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

#[must_use]
pub fn category(subject: Option<&str>, body: Option<&str>) -> Category {
    let text = format!("{} {}", subject.unwrap_or_default(), body.unwrap_or_default()).to_lowercase();
    CATEGORY_LEXICONS
        .iter()
        .find(|(_, terms)| contains_any(&text, terms))
        .map_or(Category::General, |(category, _)| *category)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct Labels {
    pub priority: Priority,
    pub sentiment: Sentiment,
    pub category: Category,
}

/// Seam for swapping the lexicon rules for another labeler without touching the store or the
/// query path.
pub trait Classify: Send + Sync {
    fn classify(&self, subject: Option<&str>, body: Option<&str>) -> Labels;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconClassifier;

impl Classify for LexiconClassifier {
    fn classify(&self, subject: Option<&str>, body: Option<&str>) -> Labels {
        Labels {
            priority: priority(subject),
            sentiment: sentiment(body),
            category: category(subject, body),
        }
    }
}
