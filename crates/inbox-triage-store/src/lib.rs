use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use inbox_triage_core::{Normalizer, RawRecord, Record, RecordId, RecordPatch};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

pub mod mutation;
pub mod query;
pub mod remote;
pub mod stats;

pub use mutation::{MutationCoordinator, MutationOutcome, Selection};
pub use query::{query, DateRange, Facet, Filters, Page, Query, QueryState, SortKey, SortOrder};
pub use remote::{HttpRecordSource, HttpSourceConfig, RecordSource, RemoteError};
pub use stats::{
    aggregate, category_breakdown, daily_sentiment, CategoryStats, DailySentiment, Stats,
};

pub const DEFAULT_STALENESS: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable view of the collection in ingestion order. Cloning is a reference-count bump.
pub type Snapshot = Arc<[Record]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub staleness: Duration,
    pub load_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { staleness: DEFAULT_STALENESS, load_timeout: DEFAULT_LOAD_TIMEOUT }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// The snapshot was younger than the staleness threshold; nothing was fetched.
    Fresh,
    Refreshed { records: usize },
    /// The fetch failed or timed out. The previous snapshot is still served.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
enum JournalEntry {
    Upsert(Record),
    Remove(RecordId),
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    record: Record,
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<RecordId, Slot>,
    next_seq: u64,
    cached: Option<Snapshot>,
    revision: u64,
    refreshed_at: Option<Instant>,
    refreshed_wall: Option<OffsetDateTime>,
    last_load_failed: bool,
    journal: Option<Vec<JournalEntry>>,
    completed_loads: u64,
    last_outcome: Option<LoadOutcome>,
}

impl State {
    fn put(&mut self, record: Record) {
        if let Some(slot) = self.slots.get_mut(&record.id) {
            slot.record = record;
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.slots.insert(record.id, Slot { seq, record });
        }
    }

    fn touch(&mut self) {
        self.cached = None;
        self.revision += 1;
    }

    fn journal(&mut self, entry: JournalEntry) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(entry);
        }
    }
}

/// Clears the write journal if a load is abandoned before it commits.
struct JournalReset<'a> {
    state: &'a Mutex<State>,
}

impl Drop for JournalReset<'_> {
    fn drop(&mut self) {
        self.state.lock().journal = None;
    }
}

/// Process-local cache of the classified collection.
///
/// Writes go through one mutex and are visible to the next [`CollectionStore::snapshot`].
/// Loads are serialized by a separate async gate, so readers and writers never wait on the
/// network.
pub struct CollectionStore<R> {
    source: R,
    normalizer: Normalizer,
    config: StoreConfig,
    state: Mutex<State>,
    load_gate: tokio::sync::Mutex<()>,
}

impl<R> std::fmt::Debug for CollectionStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CollectionStore")
            .field("config", &self.config)
            .field("records", &state.slots.len())
            .field("revision", &state.revision)
            .field("last_load_failed", &state.last_load_failed)
            .finish_non_exhaustive()
    }
}

impl<R> CollectionStore<R> {
    #[must_use]
    pub fn new(source: R) -> Self {
        Self::with_config(source, Normalizer::default(), StoreConfig::default())
    }

    #[must_use]
    pub fn with_config(source: R, normalizer: Normalizer, config: StoreConfig) -> Self {
        Self {
            source,
            normalizer,
            config,
            state: Mutex::new(State::default()),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn source(&self) -> &R {
        &self.source
    }

    #[must_use]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.config
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.state.lock().slots.get(&id).map(|slot| slot.record.clone())
    }

    /// Insert or replace a record. A replaced record keeps its position.
    pub fn upsert(&self, record: Record) {
        let mut state = self.state.lock();
        state.journal(JournalEntry::Upsert(record.clone()));
        state.put(record);
        state.touch();
    }

    pub fn remove(&self, id: RecordId) -> Option<Record> {
        let mut state = self.state.lock();
        let removed = state.slots.remove(&id)?;
        state.journal(JournalEntry::Remove(id));
        state.touch();
        Some(removed.record)
    }

    /// Apply a patch to a stored record through the normalizer and return the updated copy.
    pub fn patch(&self, id: RecordId, patch: &RecordPatch) -> Option<Record> {
        let mut state = self.state.lock();
        let slot = state.slots.get_mut(&id)?;
        self.normalizer.apply_patch(&mut slot.record, patch);
        let updated = slot.record.clone();
        state.journal(JournalEntry::Upsert(updated.clone()));
        state.touch();
        Some(updated)
    }

    /// Normalize and upsert records that did not come through a fetch.
    pub fn import(&self, raw_records: impl IntoIterator<Item = RawRecord>) -> usize {
        let records =
            raw_records.into_iter().map(|raw| self.normalizer.normalize(raw)).collect::<Vec<_>>();
        let count = records.len();
        let mut state = self.state.lock();
        for record in records {
            state.journal(JournalEntry::Upsert(record.clone()));
            state.put(record);
        }
        if count > 0 {
            state.touch();
        }
        count
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut state = self.state.lock();
        if let Some(cached) = &state.cached {
            return Arc::clone(cached);
        }
        let mut slots = state.slots.values().collect::<Vec<_>>();
        slots.sort_by_key(|slot| slot.seq);
        let snapshot: Snapshot = slots.into_iter().map(|slot| slot.record.clone()).collect();
        state.cached = Some(Arc::clone(&snapshot));
        snapshot
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn last_load_failed(&self) -> bool {
        self.state.lock().last_load_failed
    }

    #[must_use]
    pub fn last_refreshed(&self) -> Option<OffsetDateTime> {
        self.state.lock().refreshed_wall
    }

    /// Bumped by every write and every committed load.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.state
            .lock()
            .refreshed_at
            .is_some_and(|refreshed| refreshed.elapsed() < self.config.staleness)
    }
}

impl<R: RecordSource> CollectionStore<R> {
    /// Bring the snapshot up to date with the remote collection.
    ///
    /// Without `force_refresh` this is a no-op while the snapshot is younger than the staleness
    /// threshold, and callers that arrive while another load is running adopt that load's
    /// outcome. Failures never surface as errors: the last good snapshot stays in place and
    /// [`CollectionStore::last_load_failed`] is raised.
    pub async fn load(&self, force_refresh: bool) -> LoadOutcome {
        if !force_refresh && self.is_fresh() {
            return LoadOutcome::Fresh;
        }

        let observed = self.state.lock().completed_loads;
        let _gate = self.load_gate.lock().await;

        if !force_refresh {
            let state = self.state.lock();
            if state.completed_loads != observed {
                if let Some(outcome) = &state.last_outcome {
                    tracing::debug!("joined in-flight load");
                    return outcome.clone();
                }
            }
            if state
                .refreshed_at
                .is_some_and(|refreshed| refreshed.elapsed() < self.config.staleness)
            {
                return LoadOutcome::Fresh;
            }
        }

        self.state.lock().journal = Some(Vec::new());
        let _reset = JournalReset { state: &self.state };

        let fetched =
            tokio::time::timeout(self.config.load_timeout, self.source.list_records()).await;
        match fetched {
            Ok(Ok(list)) => self.commit(list.records),
            Ok(Err(err)) => self.fail(err.to_string()),
            Err(_) => self.fail(format!("load timed out after {:?}", self.config.load_timeout)),
        }
    }

    fn commit(&self, raw_records: Vec<RawRecord>) -> LoadOutcome {
        let records =
            raw_records.into_iter().map(|raw| self.normalizer.normalize(raw)).collect::<Vec<_>>();

        let mut state = self.state.lock();
        let journal = state.journal.take().unwrap_or_default();
        state.slots.clear();
        state.next_seq = 0;
        for record in records {
            state.put(record);
        }
        let replayed = journal.len();
        for entry in journal {
            match entry {
                JournalEntry::Upsert(record) => state.put(record),
                JournalEntry::Remove(id) => {
                    state.slots.remove(&id);
                }
            }
        }

        let count = state.slots.len();
        state.touch();
        state.refreshed_at = Some(Instant::now());
        state.refreshed_wall = Some(OffsetDateTime::now_utc());
        state.last_load_failed = false;
        state.completed_loads += 1;
        let outcome = LoadOutcome::Refreshed { records: count };
        state.last_outcome = Some(outcome.clone());

        tracing::info!(records = count, replayed, "collection refreshed");
        outcome
    }

    fn fail(&self, reason: String) -> LoadOutcome {
        let mut state = self.state.lock();
        state.journal = None;
        state.last_load_failed = true;
        state.completed_loads += 1;
        let outcome = LoadOutcome::Failed { reason };
        state.last_outcome = Some(outcome.clone());

        tracing::warn!(records = state.slots.len(), "collection load failed: {outcome:?}");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inbox_triage_core::{Priority, Status};
    use time::macros::datetime;

    struct NoSource;

    fn raw(id: u64, subject: &str) -> RawRecord {
        RawRecord::new(id, "sender@example.com", subject, "", datetime!(2024-03-15 10:00:00 UTC))
    }

    #[test]
    fn upsert_keeps_position_of_replaced_record() {
        let store = CollectionStore::new(NoSource);
        store.import([raw(1, "first"), raw(2, "second"), raw(3, "third")]);

        let mut replacement = match store.get(RecordId(2)) {
            Some(record) => record,
            None => panic!("record 2 should exist"),
        };
        replacement.subject = "second, edited".to_string();
        store.upsert(replacement);

        let ids = store.snapshot().iter().map(|record| record.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(
            store.get(RecordId(2)).map(|record| record.subject),
            Some("second, edited".to_string())
        );
    }

    #[test]
    fn reimport_replaces_last_write_wins() {
        let store = CollectionStore::new(NoSource);
        store.import([raw(1, "old"), raw(2, "other"), raw(1, "urgent new")]);

        assert_eq!(store.len(), 2);
        let first = &store.snapshot()[0];
        assert_eq!(first.subject, "urgent new");
        assert_eq!(first.priority, Priority::High);
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let store = CollectionStore::new(NoSource);
        store.import([raw(1, "a"), raw(2, "b")]);
        let before = store.snapshot();
        let revision = store.revision();

        store.remove(RecordId(1));
        store.patch(RecordId(2), &RecordPatch::status(Status::Resolved));

        assert_eq!(before.len(), 2);
        assert_eq!(before[1].status, Status::Pending);
        assert_eq!(store.snapshot().len(), 1);
        assert!(store.revision() > revision);
    }

    #[test]
    fn unchanged_store_reuses_cached_snapshot() {
        let store = CollectionStore::new(NoSource);
        store.import([raw(1, "a")]);
        let first = store.snapshot();
        let second = store.snapshot();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_ids_are_reported() {
        let store = CollectionStore::new(NoSource);
        assert!(store.get(RecordId(9)).is_none());
        assert!(store.remove(RecordId(9)).is_none());
        assert!(store.patch(RecordId(9), &RecordPatch::default()).is_none());
        assert!(store.is_empty());
    }
}
