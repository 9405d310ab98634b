//! Storage port and implementations

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Record, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub records: usize,
}

/// Durable backing for the dataset. Implementations may be eventually
/// consistent: callers never rely on an upsert being visible to their next read.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, session: &str, id: &str) -> Result<Option<Record>>;
    async fn upsert(&self, session: &str, record: &Record) -> Result<()>;
    /// Writes a batch as one unit: either every record is stored or none is.
    async fn upsert_many(&self, session: &str, records: &[Record]) -> Result<()>;
    async fn delete(&self, session: &str, id: &str) -> Result<()>;
    async fn list(&self, session: &str) -> Result<Vec<Record>>;
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>>;
}

type Sessions = BTreeMap<String, Vec<Record>>;

fn upsert_into(sessions: &mut Sessions, session: &str, record: &Record) {
    let records = sessions.entry(session.to_string()).or_default();
    let mut stored = record.clone();
    stored.has_unsaved_changes = false;
    match records.iter_mut().find(|r| r.id == record.id) {
        Some(slot) => *slot = stored,
        None => records.push(stored),
    }
}

fn session_infos(sessions: &Sessions) -> Vec<SessionInfo> {
    sessions
        .iter()
        .map(|(name, records)| SessionInfo { name: name.clone(), records: records.len() })
        .collect()
}

/// In-memory storage (for testing and demos)
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<Sessions>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, session: &str, id: &str) -> Result<Option<Record>> {
        let data = self.data.read().await;
        Ok(data.get(session).and_then(|rs| rs.iter().find(|r| r.id == id)).cloned())
    }

    async fn upsert(&self, session: &str, record: &Record) -> Result<()> {
        upsert_into(&mut *self.data.write().await, session, record);
        Ok(())
    }

    async fn upsert_many(&self, session: &str, records: &[Record]) -> Result<()> {
        let mut data = self.data.write().await;
        for record in records {
            upsert_into(&mut data, session, record);
        }
        Ok(())
    }

    async fn delete(&self, session: &str, id: &str) -> Result<()> {
        if let Some(records) = self.data.write().await.get_mut(session) {
            records.retain(|r| r.id != id);
        }
        Ok(())
    }

    async fn list(&self, session: &str) -> Result<Vec<Record>> {
        Ok(self.data.read().await.get(session).cloned().unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        Ok(session_infos(&*self.data.read().await))
    }
}

#[derive(Default, Deserialize)]
struct FileContents {
    #[serde(default)]
    sessions: Sessions,
}

#[derive(Serialize)]
struct FileContentsRef<'a> {
    sessions: &'a Sessions,
}

/// JSON file holding every session. The whole file is rewritten on each
/// write through a temporary sibling and a rename.
pub struct FileBackedStorage {
    path: PathBuf,
    data: RwLock<Sessions>,
}

impl FileBackedStorage {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sessions = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice::<FileContents>(&bytes)?.sessions,
            Ok(_) => Sessions::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Sessions::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, data: RwLock::new(sessions) })
    }

    /// Applies `change` and rewrites the file once. The in-memory copy is
    /// rolled back when the file could not be written.
    async fn commit<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Sessions) + Send,
    {
        let mut data = self.data.write().await;
        let previous = data.clone();
        change(&mut data);
        if let Err(e) = self.flush(&data).await {
            tracing::warn!(path=%self.path.display(), "storage flush failed, rolling back: {e}");
            *data = previous;
            return Err(e);
        }
        Ok(())
    }

    async fn flush(&self, sessions: &Sessions) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&FileContentsRef { sessions })?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path=%self.path.display(), "storage flushed");
        Ok(())
    }
}

#[async_trait]
impl Storage for FileBackedStorage {
    async fn get(&self, session: &str, id: &str) -> Result<Option<Record>> {
        let data = self.data.read().await;
        Ok(data.get(session).and_then(|rs| rs.iter().find(|r| r.id == id)).cloned())
    }

    async fn upsert(&self, session: &str, record: &Record) -> Result<()> {
        self.commit(|data| upsert_into(data, session, record)).await
    }

    async fn upsert_many(&self, session: &str, records: &[Record]) -> Result<()> {
        self.commit(|data| {
            for record in records {
                upsert_into(data, session, record);
            }
        })
        .await
    }

    async fn delete(&self, session: &str, id: &str) -> Result<()> {
        self.commit(|data| {
            if let Some(records) = data.get_mut(session) {
                records.retain(|r| r.id != id);
            }
        })
        .await
    }

    async fn list(&self, session: &str) -> Result<Vec<Record>> {
        Ok(self.data.read().await.get(session).cloned().unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        Ok(session_infos(&*self.data.read().await))
    }
}
