use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod classify;
pub mod dataset;
pub mod extract;
pub mod timestamp;

pub use classify::{category, priority, sentiment, Classify, Labels, LexiconClassifier};
pub use dataset::{parse_csv_dataset, CsvImport};
pub use extract::{display_phone, extract, Extract, PatternExtractor};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TriageError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("dataset error: {0}")]
    Dataset(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(pub u64);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = TriageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|err| TriageError::Validation(format!("invalid record id `{value}`: {err}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Self; 4] = [Self::Urgent, Self::High, Self::Medium, Self::Low];

    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Urgent => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Parse a priority label. `normal` is accepted as an alias for `medium`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "urgent" => Some(Self::Urgent),
            "high" => Some(Self::High),
            "medium" | "normal" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub const ALL: [Self; 3] = [Self::Positive, Self::Negative, Self::Neutral];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Account,
    Billing,
    Technical,
    Feature,
    General,
}

impl Category {
    pub const ALL: [Self; 5] =
        [Self::Account, Self::Billing, Self::Technical, Self::Feature, Self::General];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Billing => "billing",
            Self::Technical => "technical",
            Self::Feature => "feature",
            Self::General => "general",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "account" => Some(Self::Account),
            "billing" => Some(Self::Billing),
            "technical" => Some(Self::Technical),
            "feature" => Some(Self::Feature),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Workflow status. Transitions are unconstrained: any status may follow any other.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Resolved,
    Closed,
}

impl Status {
    pub const ALL: [Self; 4] = [Self::Pending, Self::InProgress, Self::Resolved, Self::Closed];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Entities pulled out of free text. The three sets serialize as sorted arrays; the
/// sequences keep discovery order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExtractedInfo {
    #[serde(default)]
    pub emails: BTreeSet<String>,
    #[serde(default)]
    pub phones: BTreeSet<String>,
    #[serde(default)]
    pub names: BTreeSet<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub key_phrases: Vec<String>,
}

impl ExtractedInfo {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
            && self.phones.is_empty()
            && self.names.is_empty()
            && self.dates.is_empty()
            && self.urls.is_empty()
            && self.key_phrases.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(with = "timestamp")]
    pub received_at: OffsetDateTime,
    pub priority: Priority,
    pub sentiment: Sentiment,
    pub category: Category,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub starred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub extracted: ExtractedInfo,
}

/// Ingestion shape of a record. Everything the classifier can derive is optional, and label
/// strings are kept as text so that unknown values fall back to classification instead of
/// failing the whole fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawRecord {
    pub id: RecordId,
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(with = "timestamp")]
    pub received_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ExtractedInfo>,
}

impl RawRecord {
    #[must_use]
    pub fn new(
        id: u64,
        sender: &str,
        subject: &str,
        body: &str,
        received_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: RecordId(id),
            sender: sender.to_string(),
            subject: Some(subject.to_string()),
            body: Some(body.to_string()),
            received_at,
            priority: None,
            sentiment: None,
            category: None,
            status: None,
            starred: None,
            response: None,
            extracted: None,
        }
    }
}

impl From<Record> for RawRecord {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            sender: record.sender,
            subject: Some(record.subject),
            body: Some(record.body),
            received_at: record.received_at,
            priority: Some(record.priority.as_str().to_string()),
            sentiment: Some(record.sentiment.as_str().to_string()),
            category: Some(record.category.as_str().to_string()),
            status: Some(record.status.as_str().to_string()),
            starred: Some(record.starred),
            response: record.response,
            extracted: Some(record.extracted),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl RecordPatch {
    #[must_use]
    pub fn status(status: Status) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordList {
    pub records: Vec<RawRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkUpdateItem {
    pub id: RecordId,
    pub patch: RecordPatch,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkUpdateResult {
    pub successful: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedResponse {
    pub text: String,
}

/// Per-id outcome of a batch extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchExtractItem {
    Success { id: RecordId, extracted: ExtractedInfo },
    Error { id: RecordId, message: String },
}

impl BatchExtractItem {
    #[must_use]
    pub fn id(&self) -> RecordId {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchExtractResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchExtractItem>,
}

impl BatchExtractResult {
    /// Tally a list of outcomes, keeping their order.
    #[must_use]
    pub fn from_items(results: Vec<BatchExtractItem>) -> Self {
        let successful =
            results.iter().filter(|item| matches!(item, BatchExtractItem::Success { .. })).count();
        Self { total: results.len(), successful, failed: results.len() - successful, results }
    }
}

/// Fills every derivable field of an incoming record exactly once, so downstream readers can
/// rely on fully populated records.
#[derive(Clone)]
pub struct Normalizer {
    classifier: Arc<dyn Classify>,
    extractor: Arc<dyn Extract>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Arc::new(LexiconClassifier), Arc::new(PatternExtractor))
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer").finish_non_exhaustive()
    }
}

impl Normalizer {
    #[must_use]
    pub fn new(classifier: Arc<dyn Classify>, extractor: Arc<dyn Extract>) -> Self {
        Self { classifier, extractor }
    }

    #[must_use]
    pub fn labels(&self, subject: Option<&str>, body: Option<&str>) -> Labels {
        self.classifier.classify(subject, body)
    }

    #[must_use]
    pub fn extract(&self, text: &str) -> ExtractedInfo {
        self.extractor.extract(text)
    }

    /// Turn a raw record into a fully populated one. Fields present on the raw record win;
    /// unparseable labels count as absent.
    #[must_use]
    pub fn normalize(&self, raw: RawRecord) -> Record {
        let labels = self.labels(raw.subject.as_deref(), raw.body.as_deref());
        let subject = raw.subject.unwrap_or_default();
        let body = raw.body.unwrap_or_default();
        let extracted = match raw.extracted {
            Some(extracted) => extracted,
            None => self.extract(&body),
        };

        Record {
            id: raw.id,
            sender: raw.sender,
            received_at: raw.received_at,
            priority: raw.priority.as_deref().and_then(Priority::parse).unwrap_or(labels.priority),
            sentiment: raw
                .sentiment
                .as_deref()
                .and_then(Sentiment::parse)
                .unwrap_or(labels.sentiment),
            category: raw.category.as_deref().and_then(Category::parse).unwrap_or(labels.category),
            status: raw.status.as_deref().and_then(Status::parse).unwrap_or_default(),
            starred: raw.starred.unwrap_or(false),
            response: raw.response,
            extracted,
            subject,
            body,
        }
    }

    /// Apply a partial edit in place. A change to subject or body re-derives every label the
    /// patch does not set explicitly, and re-runs extraction.
    pub fn apply_patch(&self, record: &mut Record, patch: &RecordPatch) {
        let mut text_changed = false;
        if let Some(subject) = &patch.subject {
            text_changed |= *subject != record.subject;
            record.subject.clone_from(subject);
        }
        if let Some(body) = &patch.body {
            text_changed |= *body != record.body;
            record.body.clone_from(body);
        }

        if text_changed {
            let labels = self.labels(Some(&record.subject), Some(&record.body));
            record.priority = labels.priority;
            record.sentiment = labels.sentiment;
            record.category = labels.category;
            record.extracted = self.extract(&record.body);
        }

        if let Some(priority) = patch.priority {
            record.priority = priority;
        }
        if let Some(sentiment) = patch.sentiment {
            record.sentiment = sentiment;
        }
        if let Some(category) = patch.category {
            record.category = category;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(starred) = patch.starred {
            record.starred = starred;
        }
        if let Some(response) = &patch.response {
            record.response = Some(response.clone());
        }
    }
}

/// Parse a dataset body: either a JSON array of raw records or NDJSON, one record per line.
///
/// # Errors
/// Returns [`TriageError::Dataset`] naming the offending line when any entry fails to parse.
pub fn parse_dataset(body: &str) -> Result<Vec<RawRecord>, TriageError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|err| TriageError::Dataset(format!("invalid JSON array dataset: {err}")));
    }

    let mut records = Vec::new();
    for (index, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str::<RawRecord>(line)
            .map_err(|err| TriageError::Dataset(format!("line {}: {err}", index + 1)))?;
        records.push(record);
    }
    Ok(records)
}
