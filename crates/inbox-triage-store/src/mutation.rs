use inbox_triage_core::{BulkUpdateItem, RecordId, RecordPatch, Status};
use serde::{Deserialize, Serialize};

use crate::query::Page;
use crate::remote::{RecordSource, RemoteError};
use crate::{CollectionStore, LoadOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    Applied,
    /// The remote side rejected the change and the collection was reloaded from it.
    Resynced { reason: String },
    NotFound,
    /// The remote call failed and nothing needed reloading.
    Failed { reason: String },
}

/// Ids picked for a bulk operation, kept in the order they were picked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<RecordId>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the id if absent, drop it if present. Returns whether it is now selected.
    pub fn toggle(&mut self, id: RecordId) -> bool {
        if let Some(position) = self.ids.iter().position(|selected| *selected == id) {
            self.ids.remove(position);
            false
        } else {
            self.ids.push(id);
            true
        }
    }

    pub fn select_page<T>(&mut self, page: &Page<T>, id_of: impl Fn(&T) -> RecordId) {
        for item in &page.items {
            let id = id_of(item);
            if !self.contains(id) {
                self.ids.push(id);
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.ids.contains(&id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    #[must_use]
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<RecordId> for Selection {
    fn from_iter<I: IntoIterator<Item = RecordId>>(iter: I) -> Self {
        let mut selection = Self::new();
        for id in iter {
            if !selection.contains(id) {
                selection.ids.push(id);
            }
        }
        selection
    }
}

/// Optimistic writes against a [`CollectionStore`].
///
/// Local state changes first; the remote call follows. A remote failure triggers a forced
/// reload instead of a field-level rollback.
#[derive(Debug)]
pub struct MutationCoordinator<'a, R> {
    store: &'a CollectionStore<R>,
}

impl<'a, R: RecordSource> MutationCoordinator<'a, R> {
    #[must_use]
    pub fn new(store: &'a CollectionStore<R>) -> Self {
        Self { store }
    }

    pub async fn update_record(&self, id: RecordId, patch: RecordPatch) -> MutationOutcome {
        if self.store.patch(id, &patch).is_none() {
            return MutationOutcome::NotFound;
        }

        match self.store.source().update_record(id, patch).await {
            Ok(raw) => {
                self.store.upsert(self.store.normalizer().normalize(raw));
                MutationOutcome::Applied
            }
            Err(err) => self.resync(format!("update of record {id} failed: {err}")).await,
        }
    }

    pub async fn delete_record(&self, id: RecordId) -> MutationOutcome {
        if self.store.remove(id).is_none() {
            return MutationOutcome::NotFound;
        }

        match self.store.source().delete_record(id).await {
            Ok(()) => MutationOutcome::Applied,
            Err(err) => self.resync(format!("delete of record {id} failed: {err}")).await,
        }
    }

    /// Set the status of every selected record, then reload unconditionally. The selection is
    /// cleared either way.
    pub async fn bulk_update_status(
        &self,
        selection: &mut Selection,
        status: Status,
    ) -> MutationOutcome {
        if selection.is_empty() {
            return MutationOutcome::Applied;
        }

        let patch = RecordPatch::status(status);
        let updates = selection
            .ids()
            .iter()
            .filter(|id| self.store.patch(**id, &patch).is_some())
            .map(|id| BulkUpdateItem { id: *id, patch: patch.clone() })
            .collect::<Vec<_>>();
        // Only ids the store still holds are sent.
        let requested = updates.len();
        selection.clear();

        let failure = match self.store.source().bulk_update(updates).await {
            Ok(result) if result.successful == result.total && result.total == requested => None,
            Ok(result) => Some(format!(
                "bulk status update applied to {} of {requested} records",
                result.successful
            )),
            Err(err) => Some(format!("bulk status update failed: {err}")),
        };
        self.finish_bulk(failure).await
    }

    /// Delete every selected record, one remote call per id, then reload unconditionally.
    pub async fn bulk_delete(&self, selection: &mut Selection) -> MutationOutcome {
        if selection.is_empty() {
            return MutationOutcome::Applied;
        }

        let ids = selection.ids().to_vec();
        selection.clear();
        for id in &ids {
            self.store.remove(*id);
        }

        let mut failed: Vec<(RecordId, RemoteError)> = Vec::new();
        for id in &ids {
            if let Err(err) = self.store.source().delete_record(*id).await {
                failed.push((*id, err));
            }
        }

        let failure = if failed.is_empty() {
            None
        } else {
            let detail = failed
                .iter()
                .map(|(id, err)| format!("{id}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            Some(format!("{} of {} deletes failed ({detail})", failed.len(), ids.len()))
        };
        self.finish_bulk(failure).await
    }

    /// Ask the remote generator for a reply draft and store it on the record.
    pub async fn generate_response(&self, id: RecordId) -> MutationOutcome {
        if self.store.get(id).is_none() {
            return MutationOutcome::NotFound;
        }

        match self.store.source().generate_response(id).await {
            Ok(generated) => {
                let patch = RecordPatch { response: Some(generated.text), ..RecordPatch::default() };
                match self.store.patch(id, &patch) {
                    Some(_) => MutationOutcome::Applied,
                    None => MutationOutcome::NotFound,
                }
            }
            Err(RemoteError::NotFound(_)) => MutationOutcome::NotFound,
            Err(err) => {
                tracing::warn!("response generation for record {id} failed: {err}");
                MutationOutcome::Failed { reason: err.to_string() }
            }
        }
    }

    async fn finish_bulk(&self, failure: Option<String>) -> MutationOutcome {
        match failure {
            Some(reason) => self.resync(reason).await,
            None => {
                if let LoadOutcome::Failed { reason } = self.store.load(true).await {
                    tracing::warn!("reload after bulk operation failed: {reason}");
                }
                MutationOutcome::Applied
            }
        }
    }

    async fn resync(&self, reason: String) -> MutationOutcome {
        tracing::warn!("{reason}; reloading collection");
        if let LoadOutcome::Failed { reason: load_reason } = self.store.load(true).await {
            tracing::warn!("resync reload failed: {load_reason}");
        }
        MutationOutcome::Resynced { reason }
    }
}
