use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::duplicates::{self, DuplicateReport};
use crate::{Record, RecordPatch, Result, Storage};

/// Shared in-memory record collection.
///
/// Every write is keyed by record ID and performed under the write lock, so
/// concurrent writers touching different records never interfere and a write
/// aimed at a record that no longer exists is a no-op.
#[derive(Clone, Default)]
pub struct DatasetStore {
    records: Arc<RwLock<Vec<Record>>>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records: Arc::new(RwLock::new(records)) }
    }

    pub async fn load(storage: &dyn Storage, session: &str) -> Result<Self> {
        let records = storage.list(session).await?;
        debug!(session, count = records.len(), "dataset loaded");
        Ok(Self::from_records(records))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Record> {
        self.records.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Record> {
        self.records.read().await.clone()
    }

    /// Inserts a record, replacing any record with the same ID in place.
    pub async fn insert(&self, record: Record) {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => records.push(record),
        }
    }

    /// Merge-by-ID. Returns `false` when no record has this ID.
    pub async fn merge(&self, id: &str, patch: &RecordPatch) -> bool {
        self.update(id, |rec| {
            patch.apply(rec);
        })
        .await
    }

    /// Runs `f` against the record with this ID under the write lock.
    pub async fn update<F: FnOnce(&mut Record)>(&self, id: &str, f: F) -> bool {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(rec) => {
                f(rec);
                true
            }
            None => false,
        }
    }

    pub async fn set_discarded(&self, id: &str, discarded: bool) -> bool {
        self.merge(id, &RecordPatch { is_discarded: Some(discarded), ..Default::default() }).await
    }

    pub async fn delete(&self, id: &str) -> Option<Record> {
        let mut records = self.records.write().await;
        let pos = records.iter().position(|r| r.id == id)?;
        Some(records.remove(pos))
    }

    pub async fn analyze_duplicates(&self) -> DuplicateReport {
        duplicates::analyze(&mut self.records.write().await)
    }

    pub async fn auto_resolve_duplicates(&self) -> usize {
        duplicates::auto_resolve(&mut self.records.write().await)
    }

    /// Upserts every dirty record and clears the flag on records that were
    /// not modified again while saving. Returns the number of records written.
    pub async fn save_dirty(&self, storage: &dyn Storage, session: &str) -> Result<usize> {
        let dirty: Vec<Record> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.has_unsaved_changes)
            .cloned()
            .collect();

        if dirty.is_empty() {
            return Ok(0);
        }
        storage.upsert_many(session, &dirty).await?;

        let mut records = self.records.write().await;
        for saved in &dirty {
            if let Some(cur) = records.iter_mut().find(|r| r.id == saved.id) {
                if cur == saved {
                    cur.has_unsaved_changes = false;
                }
            }
        }
        debug!(session, saved = dirty.len(), "dirty records saved");
        Ok(dirty.len())
    }
}
