//! Store command, response, and error types

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::Run;

use super::patch::RunPatch;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The patch would introduce a dependency cycle; nothing was applied
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already exists: {0}")]
    DuplicateRun(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Store channel closed")]
    ChannelError,
}

impl StoreError {
    /// Stable error-kind identifier for the control plane and wire surface
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CycleDetected { .. } => "cycle_detected",
            Self::RunNotFound(_) => "run_not_found",
            Self::DuplicateRun(_) => "duplicate_run",
            Self::TaskNotFound(_) => "task_not_found",
            Self::ChannelError => "store_unavailable",
        }
    }
}

/// Result alias for store replies
pub type StoreResponse<T> = Result<T, StoreError>;

/// Commands processed by the store actor
pub enum StoreCommand {
    CreateRun {
        run: Run,
        reply: oneshot::Sender<StoreResponse<String>>,
    },
    GetRun {
        run_id: String,
        reply: oneshot::Sender<StoreResponse<Option<Run>>>,
    },
    ApplyPatch {
        run_id: String,
        patch: RunPatch,
        reply: oneshot::Sender<StoreResponse<u64>>,
    },
    ListRunIds {
        reply: oneshot::Sender<StoreResponse<Vec<String>>>,
    },
    Version {
        run_id: String,
        reply: oneshot::Sender<StoreResponse<u64>>,
    },
    Shutdown,
}
