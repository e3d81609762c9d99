//! runstore - durable run-state persistence
//!
//! Stores serialized run snapshots keyed by `(run_id, thread_id)` plus a
//! lightweight `runs` summary table for list views that never parse full
//! snapshots. Two backends implement the same [`CheckpointBackend`] trait:
//!
//! - [`FileBackend`]: JSON snapshot files with atomic rename and an advisory
//!   directory lock
//! - [`SqliteBackend`]: a single SQLite database in WAL mode
//!
//! The engine above this crate decides *what* to snapshot; runstore only
//! guarantees atomic put/get by key and a consistent summary index.

mod backend;
mod file;
mod sqlite;

pub use backend::{CheckpointBackend, CheckpointKey, RunPage, RunSummary};
pub use file::FileBackend;
pub use sqlite::SqliteBackend;

use thiserror::Error;

/// Errors from persistence operations
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store lock unavailable: {0}")]
    LockFailed(String),

    #[error("Corrupt store entry for {0}")]
    Corrupt(String),
}
