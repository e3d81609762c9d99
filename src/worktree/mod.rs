//! Per-task isolated workspaces and serialized trunk merges

mod manager;

pub use manager::{MergeResult, RecoveryReport, WorktreeConfig, WorktreeError, WorktreeInfo, WorktreeManager};
