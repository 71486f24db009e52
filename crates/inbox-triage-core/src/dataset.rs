//! CSV ingestion for spreadsheet exports of a support mailbox.
//!
//! Columns are matched by name, case-insensitively, against a few aliases per field. Rows carry
//! no ids, so records are numbered in file order.

use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;

use crate::timestamp::parse_dataset_date;
use crate::{RawRecord, TriageError};

const SENDER_COLUMNS: &[&str] = &["sender", "from", "email", "from_email", "sender_email"];
const SUBJECT_COLUMNS: &[&str] = &["subject", "title"];
const BODY_COLUMNS: &[&str] = &["body", "message", "content", "email_body"];
const DATE_COLUMNS: &[&str] = &["sent_date", "received_date", "date", "time", "timestamp"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvImport {
    pub records: Vec<RawRecord>,
    /// Rows missing a sender or subject, plus repeats of an earlier sender, subject and date.
    pub skipped: usize,
}

fn column<'a>(row: &'a HashMap<String, String>, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|alias| row.get(*alias))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}

/// Parse a CSV export with a header row into raw records numbered from `first_id`.
///
/// Rows whose date cell is missing or unreadable get `fallback_received_at`. Body whitespace
/// is collapsed to single spaces.
///
/// # Errors
/// Returns [`TriageError::Dataset`] naming the row when the CSV itself is malformed.
pub fn parse_csv_dataset(
    body: &str,
    first_id: u64,
    fallback_received_at: OffsetDateTime,
) -> Result<CsvImport, TriageError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(body.as_bytes());

    let mut import = CsvImport::default();
    let mut seen = HashSet::new();
    let mut next_id = first_id;
    // Cells past the end of a short row come back as `None`.
    for (index, row) in reader.deserialize::<HashMap<String, Option<String>>>().enumerate() {
        let row = row.map_err(|err| TriageError::Dataset(format!("row {}: {err}", index + 1)))?;
        let row = row
            .into_iter()
            .filter_map(|(key, value)| Some((key.to_ascii_lowercase(), value?)))
            .collect::<HashMap<_, _>>();

        let (Some(sender), Some(subject)) =
            (column(&row, SENDER_COLUMNS), column(&row, SUBJECT_COLUMNS))
        else {
            import.skipped += 1;
            continue;
        };
        let received_at = column(&row, DATE_COLUMNS)
            .and_then(parse_dataset_date)
            .unwrap_or(fallback_received_at);
        if !seen.insert((sender.to_string(), subject.to_string(), received_at)) {
            import.skipped += 1;
            continue;
        }

        let text = column(&row, BODY_COLUMNS)
            .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        import.records.push(RawRecord::new(next_id, sender, subject, &text, received_at));
        next_id += 1;
    }

    tracing::debug!(records = import.records.len(), skipped = import.skipped, "csv dataset parsed");
    Ok(import)
}
