use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use inbox_triage_core::{
    parse_csv_dataset, parse_dataset, BatchExtractItem, BatchExtractResult, BulkUpdateItem,
    BulkUpdateResult, ExtractedInfo, GeneratedResponse, Normalizer, RawRecord, Record, RecordId,
    RecordList, RecordPatch,
};
use inbox_triage_store::{aggregate, Stats};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod respond;

pub use respond::{ResponseGenerator, TemplateResponder};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Raised for operations that name an id the service does not hold. Adapters downcast to this
/// to pick a not-found status.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
#[error("record {0} not found")]
pub struct RecordNotFound(pub RecordId);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted: RecordId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkUpdateRequest {
    pub updates: Vec<BulkUpdateItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchExtractRequest {
    pub ids: Vec<RecordId>,
}

/// In-memory record service backing the HTTP adapter.
///
/// Records are normalized on the way in and kept ordered by id. Clones share the same data.
#[derive(Clone)]
pub struct InboxApi {
    records: Arc<RwLock<BTreeMap<RecordId, Record>>>,
    normalizer: Normalizer,
    responder: Arc<dyn ResponseGenerator>,
}

impl Debug for InboxApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboxApi").field("records", &self.records.read().len()).finish_non_exhaustive()
    }
}

impl Default for InboxApi {
    fn default() -> Self {
        Self::new(Normalizer::default(), Arc::new(TemplateResponder))
    }
}

impl InboxApi {
    #[must_use]
    pub fn new(normalizer: Normalizer, responder: Arc<dyn ResponseGenerator>) -> Self {
        Self { records: Arc::new(RwLock::new(BTreeMap::new())), normalizer, responder }
    }

    /// Build a service seeded from a dataset file.
    ///
    /// A `.csv` file is read as a mailbox export: records are numbered from 1 and rows without
    /// a date get the load time. Anything else is read as a JSON array or NDJSON.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or any entry fails to parse.
    pub fn from_dataset(path: &Path) -> Result<Self> {
        let is_csv =
            path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("csv"));
        let bytes =
            fs::read(path).with_context(|| format!("failed to read dataset {}", path.display()))?;

        let records = if is_csv {
            let body = String::from_utf8_lossy(&bytes);
            let import = parse_csv_dataset(&body, 1, OffsetDateTime::now_utc())
                .with_context(|| format!("failed to parse dataset {}", path.display()))?;
            if import.skipped > 0 {
                tracing::info!(skipped = import.skipped, "skipped incomplete or repeated rows");
            }
            import.records
        } else {
            let body = String::from_utf8(bytes)
                .with_context(|| format!("dataset {} is not UTF-8", path.display()))?;
            parse_dataset(&body)
                .with_context(|| format!("failed to parse dataset {}", path.display()))?
        };

        let api = Self::default();
        let count = api.import(records);
        tracing::info!(records = count, path = %path.display(), "dataset loaded");
        Ok(api)
    }

    /// Normalize and insert records, replacing any with the same id.
    pub fn import(&self, raw_records: impl IntoIterator<Item = RawRecord>) -> usize {
        let mut records = self.records.write();
        let mut count = 0;
        for raw in raw_records {
            let record = self.normalizer.normalize(raw);
            records.insert(record.id, record);
            count += 1;
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn list_records(&self) -> RecordList {
        RecordList { records: self.records.read().values().cloned().map(RawRecord::from).collect() }
    }

    /// # Errors
    /// Returns [`RecordNotFound`] when no record has `id`.
    pub fn get_record(&self, id: RecordId) -> Result<Record> {
        self.records.read().get(&id).cloned().ok_or_else(|| RecordNotFound(id).into())
    }

    /// # Errors
    /// Returns [`RecordNotFound`] when no record has `id`.
    pub fn update_record(&self, id: RecordId, patch: &RecordPatch) -> Result<RawRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(RecordNotFound(id))?;
        self.normalizer.apply_patch(record, patch);
        Ok(RawRecord::from(record.clone()))
    }

    /// # Errors
    /// Returns [`RecordNotFound`] when no record has `id`.
    pub fn delete_record(&self, id: RecordId) -> Result<DeleteResult> {
        self.records.write().remove(&id).ok_or(RecordNotFound(id))?;
        Ok(DeleteResult { deleted: id })
    }

    /// Apply each update independently. Unknown ids count against `successful`.
    #[must_use]
    pub fn bulk_update(&self, updates: &[BulkUpdateItem]) -> BulkUpdateResult {
        let successful = updates
            .iter()
            .filter(|item| match self.update_record(item.id, &item.patch) {
                Ok(_) => true,
                Err(err) => {
                    tracing::debug!("bulk update skipped: {err}");
                    false
                }
            })
            .count();
        BulkUpdateResult { successful, total: updates.len() }
    }

    /// Draft a reply and keep it on the record.
    ///
    /// # Errors
    /// Returns [`RecordNotFound`] for an unknown id, or the generator's error.
    pub fn generate_response(&self, id: RecordId) -> Result<GeneratedResponse> {
        let record = self.get_record(id)?;
        let text = self
            .responder
            .generate(&record)
            .with_context(|| format!("failed to generate a response for record {id}"))?;
        let patch = RecordPatch { response: Some(text.clone()), ..RecordPatch::default() };
        self.update_record(id, &patch)?;
        Ok(GeneratedResponse { text })
    }

    /// Extraction over the subject and body together.
    ///
    /// # Errors
    /// Returns [`RecordNotFound`] when no record has `id`.
    pub fn extract_info(&self, id: RecordId) -> Result<ExtractedInfo> {
        let record = self.get_record(id)?;
        Ok(self.normalizer.extract(&format!("{}\n{}", record.subject, record.body)))
    }

    /// Run [`InboxApi::extract_info`] for each id. Unknown ids become error entries instead of
    /// failing the batch.
    #[must_use]
    pub fn batch_extract(&self, ids: &[RecordId]) -> BatchExtractResult {
        let results = ids
            .iter()
            .map(|id| match self.extract_info(*id) {
                Ok(extracted) => BatchExtractItem::Success { id: *id, extracted },
                Err(err) => BatchExtractItem::Error { id: *id, message: err.to_string() },
            })
            .collect();
        BatchExtractResult::from_items(results)
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        let records = self.records.read().values().cloned().collect::<Vec<_>>();
        aggregate(&records)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use inbox_triage_core::{Category, Status};
    use time::macros::datetime;

    fn fixture_api() -> InboxApi {
        let api = InboxApi::default();
        api.import([
            RawRecord::new(
                2,
                "lee@example.com",
                "Refund please",
                "I was charged twice. Call +1 (555) 123-4567.",
                datetime!(2024-03-14 09:00:00 UTC),
            ),
            RawRecord::new(
                1,
                "kim@example.com",
                "Login trouble",
                "cannot sign in",
                datetime!(2024-03-15 09:00:00 UTC),
            ),
        ]);
        api
    }

    fn unique_temp_path(extension: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos());
        std::env::temp_dir().join(format!("inbox-triage-api-{nanos}.{extension}"))
    }

    #[test]
    fn list_is_ordered_by_id_and_fully_labelled() {
        let list = fixture_api().list_records();

        let ids = list.records.iter().map(|raw| raw.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(list.records[1].category.as_deref(), Some("billing"));
        assert_eq!(list.records[0].status.as_deref(), Some("pending"));
    }

    #[test]
    fn update_and_delete_report_missing_ids() -> Result<()> {
        let api = fixture_api();

        let updated = api.update_record(RecordId(1), &RecordPatch::status(Status::Resolved))?;
        assert_eq!(updated.status.as_deref(), Some("resolved"));

        let err = match api.update_record(RecordId(9), &RecordPatch::default()) {
            Ok(_) => panic!("unknown id should fail"),
            Err(err) => err,
        };
        assert_eq!(err.downcast_ref::<RecordNotFound>(), Some(&RecordNotFound(RecordId(9))));

        assert_eq!(api.delete_record(RecordId(2))?, DeleteResult { deleted: RecordId(2) });
        assert!(api.delete_record(RecordId(2)).is_err());
        assert_eq!(api.len(), 1);
        Ok(())
    }

    #[test]
    fn bulk_update_counts_successes() {
        let api = fixture_api();
        let updates = [1, 2, 3]
            .into_iter()
            .map(|id| BulkUpdateItem { id: RecordId(id), patch: RecordPatch::status(Status::Closed) })
            .collect::<Vec<_>>();

        let result = api.bulk_update(&updates);

        assert_eq!(result, BulkUpdateResult { successful: 2, total: 3 });
        assert_eq!(api.stats().by_status.closed, 2);
    }

    #[test]
    fn generated_response_is_persisted() -> Result<()> {
        let api = fixture_api();

        let generated = api.generate_response(RecordId(2))?;

        assert!(generated.text.contains("billing inquiry"));
        assert_eq!(api.get_record(RecordId(2))?.response, Some(generated.text));
        assert_eq!(api.get_record(RecordId(2))?.category, Category::Billing);
        Ok(())
    }

    #[test]
    fn extract_info_reads_subject_and_body() -> Result<()> {
        let info = fixture_api().extract_info(RecordId(2))?;

        assert!(info.phones.contains("+1 (555) 123-4567"));
        assert!(info.key_phrases.contains(&"refund".to_string()));
        Ok(())
    }

    #[test]
    fn batch_extract_reports_each_id() {
        let result = fixture_api().batch_extract(&[RecordId(2), RecordId(8), RecordId(1)]);

        assert_eq!((result.total, result.successful, result.failed), (3, 2, 1));
        let ids = result.results.iter().map(BatchExtractItem::id).collect::<Vec<_>>();
        assert_eq!(ids, vec![RecordId(2), RecordId(8), RecordId(1)]);
        match &result.results[1] {
            BatchExtractItem::Error { message, .. } => assert!(message.contains("not found")),
            other => panic!("unknown id should be an error entry: {other:?}"),
        }
        match &result.results[0] {
            BatchExtractItem::Success { extracted, .. } => {
                assert!(extracted.phones.contains("+1 (555) 123-4567"));
            }
            other => panic!("known id should succeed: {other:?}"),
        }
    }

    #[test]
    fn dataset_file_loads_csv_export() -> Result<()> {
        let path = unique_temp_path("csv");
        fs::write(
            &path,
            concat!(
                "sender,subject,body,sent_date\n",
                "a@x.io,Password reset,cannot log in,2024-03-15 10:00:00\n",
                ",Missing sender,dropped,2024-03-15\n",
                "b@x.io,Invoice question,charged twice,14/03/2024 08:00\n",
            ),
        )?;

        let api = InboxApi::from_dataset(&path)?;
        fs::remove_file(&path)?;

        assert_eq!(api.len(), 2);
        assert_eq!(api.get_record(RecordId(1))?.category, Category::Account);
        assert_eq!(api.get_record(RecordId(2))?.category, Category::Billing);
        Ok(())
    }

    #[test]
    fn dataset_file_loads_ndjson() -> Result<()> {
        let path = unique_temp_path("ndjson");
        fs::write(
            &path,
            concat!(
                r#"{"id": 5, "sender": "a@x.io", "subject": "Bug report", "received_at": "2024-03-15 10:00:00"}"#,
                "\n",
                r#"{"id": 6, "sender": "b@x.io", "priority": "normal", "received_at": "2024-03-15T11:00:00Z"}"#,
                "\n"
            ),
        )?;

        let api = InboxApi::from_dataset(&path)?;
        fs::remove_file(&path)?;

        assert_eq!(api.len(), 2);
        assert_eq!(api.get_record(RecordId(5))?.category, Category::Technical);
        Ok(())
    }

    #[test]
    fn missing_dataset_file_is_an_error() {
        let err = match InboxApi::from_dataset(Path::new("/definitely/not/here.json")) {
            Ok(_) => panic!("missing dataset should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("failed to read dataset"));
    }
}
