use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dataset::{DatasetStore, FileBackedStorage, InMemoryStorage, Record, RecordPatch, SessionInfo, Storage};

fn sample() -> Vec<Record> {
    vec![
        Record::new("1", "What is ownership?", "", "Moves and borrows."),
        Record::new("2", "what is ownership? ", "", "Short"),
        Record::new("3", "Explain lifetimes", "", ""),
    ]
}

#[tokio::test]
async fn test_merge_by_id() {
    let store = DatasetStore::from_records(sample());

    let patch = RecordPatch { answer: Some("Rewritten".into()), ..Default::default() };
    assert!(store.merge("3", &patch).await);

    let rec = store.get("3").await.unwrap();
    assert_eq!(rec.answer, "Rewritten");
    assert!(rec.has_unsaved_changes);
}

#[tokio::test]
async fn test_merge_after_delete_is_noop() {
    let store = DatasetStore::from_records(sample());
    assert!(store.delete("2").await.is_some());

    let patch = RecordPatch { answer: Some("late".into()), ..Default::default() };
    assert!(!store.merge("2", &patch).await);
    assert_eq!(store.len().await, 2);
    assert!(store.get("2").await.is_none());
}

#[tokio::test]
async fn test_concurrent_merges_to_different_records() {
    let records: Vec<Record> = (0..50).map(|i| Record::new(i.to_string(), "q", "", "")).collect();
    let store = DatasetStore::from_records(records);

    let mut handles = Vec::new();
    for i in 0..50 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let patch = RecordPatch { answer: Some(format!("answer {i}")), ..Default::default() };
            store.merge(&i.to_string(), &patch).await
        }));
    }
    for h in handles {
        assert!(h.await.unwrap());
    }

    for (i, rec) in store.snapshot().await.iter().enumerate() {
        assert_eq!(rec.answer, format!("answer {i}"));
    }
}

#[tokio::test]
async fn test_duplicate_scan_and_resolve() {
    let store = DatasetStore::from_records(sample());
    let report = store.analyze_duplicates().await;
    assert_eq!(report.groups, 1);

    assert_eq!(store.auto_resolve_duplicates().await, 1);
    assert!(!store.get("1").await.unwrap().is_discarded);
    assert!(store.get("2").await.unwrap().is_discarded);
    assert_eq!(store.auto_resolve_duplicates().await, 0);
}

#[tokio::test]
async fn test_save_dirty_clears_flags() {
    let storage = InMemoryStorage::new();
    let store = DatasetStore::from_records(sample());
    store.merge("1", &RecordPatch::score(4)).await;

    assert_eq!(store.save_dirty(&storage, "s1").await.unwrap(), 1);
    assert!(!store.get("1").await.unwrap().has_unsaved_changes);

    let stored = storage.get("s1", "1").await.unwrap().unwrap();
    assert_eq!(stored.score, 4);
    assert!(!stored.has_unsaved_changes);

    assert_eq!(store.save_dirty(&storage, "s1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_file_backed_storage_persists_sessions() {
    let path = std::env::temp_dir().join(format!("dataset-{}.json", uuid::Uuid::new_v4()));

    {
        let storage = FileBackedStorage::open(&path).await.unwrap();
        for rec in sample() {
            storage.upsert("alpha", &rec).await.unwrap();
        }
        storage.upsert("beta", &Record::new("b1", "q", "", "")).await.unwrap();
        storage.delete("alpha", "2").await.unwrap();
    }

    let reopened = FileBackedStorage::open(&path).await.unwrap();
    let sessions = reopened.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].name, "alpha");
    assert_eq!(sessions[0].records, 2);

    let store = DatasetStore::load(&reopened, "alpha").await.unwrap();
    assert_eq!(store.len().await, 2);
    assert!(store.get("2").await.is_none());

    let _ = std::fs::remove_file(&path);
}

/// In-memory storage that counts write calls.
#[derive(Default)]
struct CountingStorage {
    inner: InMemoryStorage,
    single: AtomicUsize,
    batches: AtomicUsize,
}

#[async_trait]
impl Storage for CountingStorage {
    async fn get(&self, session: &str, id: &str) -> dataset::Result<Option<Record>> {
        self.inner.get(session, id).await
    }

    async fn upsert(&self, session: &str, record: &Record) -> dataset::Result<()> {
        self.single.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(session, record).await
    }

    async fn upsert_many(&self, session: &str, records: &[Record]) -> dataset::Result<()> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_many(session, records).await
    }

    async fn delete(&self, session: &str, id: &str) -> dataset::Result<()> {
        self.inner.delete(session, id).await
    }

    async fn list(&self, session: &str) -> dataset::Result<Vec<Record>> {
        self.inner.list(session).await
    }

    async fn list_sessions(&self) -> dataset::Result<Vec<SessionInfo>> {
        self.inner.list_sessions().await
    }
}

#[tokio::test]
async fn test_save_dirty_writes_one_batch() {
    let storage = CountingStorage::default();
    let store = DatasetStore::from_records(sample());
    for id in ["1", "2", "3"] {
        store.merge(id, &RecordPatch::score(3)).await;
    }

    assert_eq!(store.save_dirty(&storage, "s").await.unwrap(), 3);
    assert_eq!(storage.batches.load(Ordering::SeqCst), 1);
    assert_eq!(storage.single.load(Ordering::SeqCst), 0);
    assert_eq!(storage.list("s").await.unwrap().len(), 3);

    // nothing dirty, nothing written
    assert_eq!(store.save_dirty(&storage, "s").await.unwrap(), 0);
    assert_eq!(storage.batches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_flush_rolls_back() {
    // the parent directory does not exist, so every flush fails
    let path = std::env::temp_dir()
        .join(format!("dataset-missing-{}", uuid::Uuid::new_v4()))
        .join("data.json");
    let storage = FileBackedStorage::open(&path).await.unwrap();

    assert!(storage.upsert("s", &Record::new("1", "q", "", "")).await.is_err());
    assert!(storage.upsert_many("s", &sample()).await.is_err());
    assert!(storage.list("s").await.unwrap().is_empty());
    assert!(storage.list_sessions().await.unwrap().is_empty());
    assert!(storage.get("s", "1").await.unwrap().is_none());

    let store = DatasetStore::from_records(sample());
    store.merge("1", &RecordPatch::score(5)).await;
    assert!(store.save_dirty(&storage, "s").await.is_err());
    assert!(store.get("1").await.unwrap().has_unsaved_changes);
}

#[tokio::test]
async fn test_file_backed_batch_upsert() {
    let path = std::env::temp_dir().join(format!("dataset-{}.json", uuid::Uuid::new_v4()));
    let storage = FileBackedStorage::open(&path).await.unwrap();
    storage.upsert_many("s", &sample()).await.unwrap();

    let reopened = FileBackedStorage::open(&path).await.unwrap();
    assert_eq!(reopened.list("s").await.unwrap().len(), 3);

    let _ = std::fs::remove_file(&path);
}
