//! Backend trait and summary records

use serde::{Deserialize, Serialize};

use crate::PersistError;

/// Checkpoint key: a run may be re-threaded, so both parts matter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub run_id: String,
    pub thread_id: String,
}

impl CheckpointKey {
    pub fn new(run_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.run_id, self.thread_id)
    }
}

/// Summary row for list views; everything needed without parsing a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub thread_id: String,
    pub objective: String,
    pub status: String,
    pub workspace_path: String,
    /// JSON object mapping task status -> count
    pub task_counts: serde_json::Value,
    /// RFC 3339 timestamps
    pub created_at: String,
    pub updated_at: String,
}

/// One page of run summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPage {
    pub items: Vec<RunSummary>,
    pub total: usize,
    pub has_more: bool,
}

/// Atomic snapshot storage keyed by `(run_id, thread_id)`
///
/// Implementations must make `put` atomic: a reader never observes a torn
/// snapshot, and the summary index is updated with the snapshot.
pub trait CheckpointBackend: Send + Sync {
    /// Store a snapshot and its summary row (upsert)
    fn put(&self, key: &CheckpointKey, snapshot: &[u8], summary: &RunSummary) -> Result<(), PersistError>;

    /// Fetch a snapshot
    fn get(&self, key: &CheckpointKey) -> Result<Option<Vec<u8>>, PersistError>;

    /// Remove a snapshot and its summary row
    fn delete(&self, key: &CheckpointKey) -> Result<(), PersistError>;

    /// Page through run summaries, most recently updated first
    fn list_runs(&self, limit: usize, offset: usize) -> Result<RunPage, PersistError>;

    /// Fetch one summary row
    fn get_summary(&self, run_id: &str) -> Result<Option<RunSummary>, PersistError>;
}
