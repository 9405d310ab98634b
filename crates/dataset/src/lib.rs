//! Curated dataset model
//!
//! Records, the shared in-memory store with merge-by-ID writes, the storage
//! port used for durable backing, and duplicate analysis.

mod record;
mod store;
mod storage;
pub mod duplicates;

pub use record::{Message, MessagePatch, Record, RecordId, RecordPatch, ROLE_USER};
pub use store::DatasetStore;
pub use storage::{FileBackedStorage, InMemoryStorage, SessionInfo, Storage};
pub use duplicates::DuplicateReport;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DatasetError>;
