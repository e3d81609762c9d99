//! ToolContext - execution context for tools
//!
//! Each worker execution gets its own `ToolContext` scoping every file
//! operation to its git worktree. Reads may additionally touch explicitly
//! permitted shared roots (the trunk checkout, a merge source); writes never
//! leave the worktree. Writing a file that exists but was not read first is
//! rejected, which forces agents to look before they overwrite.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::{Escalation, SuggestedTask, WorkerStatus};

use super::ToolError;

/// One audited shell invocation from the bash tool
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub command: String,
    /// None when the command was killed (timeout or signal)
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// Structured data tools hand back to the worker outside the conversation
#[derive(Debug, Default)]
pub struct SideChannel {
    /// Tasks proposed via create_subtasks, pending director approval
    pub suggested_tasks: Vec<SuggestedTask>,

    /// Shell commands executed this attempt, for the after-action report
    pub commands: Vec<CommandRecord>,

    /// Insights posted mid-run
    pub insights: Vec<String>,

    /// Terminal signal from complete_task
    pub completion: Option<CompletionSignal>,

    /// Conventional report path written by write_report
    pub report_path: Option<String>,

    /// Structured verdict submitted by the QA profile
    pub qa_verdict: Option<crate::domain::QaVerdict>,
}

/// Terminal signal a worker raises through the complete_task tool
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    pub status: WorkerStatus,
    pub summary: String,
    pub result_path: Option<String>,
    pub escalation: Option<Escalation>,
}

/// Execution context for tools - scoped to a single worker execution
#[derive(Clone)]
pub struct ToolContext {
    /// Git worktree path - all writes constrained here
    pub worktree: PathBuf,

    /// Task being executed (for attribution)
    pub task_id: String,

    /// Roots outside the worktree that reads may touch
    pub shared_roots: Vec<PathBuf>,

    /// Files read this execution (write validation)
    read_files: Arc<Mutex<HashSet<PathBuf>>>,

    /// Structured tool output collected for the worker
    pub side_channel: Arc<Mutex<SideChannel>>,

    /// Whether sandbox mode is enabled (default: true)
    pub sandbox_enabled: bool,
}

impl ToolContext {
    /// Create a new tool context
    pub fn new(worktree: PathBuf, task_id: String) -> Self {
        Self {
            worktree,
            task_id,
            shared_roots: Vec::new(),
            read_files: Arc::new(Mutex::new(HashSet::new())),
            side_channel: Arc::new(Mutex::new(SideChannel::default())),
            sandbox_enabled: true,
        }
    }

    /// Create a context with sandbox disabled (for testing)
    pub fn new_unsandboxed(worktree: PathBuf, task_id: String) -> Self {
        Self {
            sandbox_enabled: false,
            ..Self::new(worktree, task_id)
        }
    }

    /// Permit reads under an additional root (trunk checkout, merge source)
    pub fn with_shared_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.shared_roots.push(root.into());
        self
    }

    /// Track that a file was read (enables write validation)
    pub async fn track_read(&self, path: &Path) {
        let mut read_files = self.read_files.lock().await;
        read_files.insert(self.normalize_path(path));
    }

    /// Check if a file was read this execution
    pub async fn was_read(&self, path: &Path) -> bool {
        let read_files = self.read_files.lock().await;
        read_files.contains(&self.normalize_path(path))
    }

    /// Clear read tracking (fresh attempt)
    pub async fn clear_reads(&self) {
        let mut read_files = self.read_files.lock().await;
        read_files.clear();
    }

    /// Normalize a path relative to the worktree
    fn normalize_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.worktree.join(path) }
    }

    /// Resolve symlinks as far as the filesystem allows
    fn canonicalize_lenient(path: &Path) -> PathBuf {
        if path.exists() {
            return path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        }
        // For paths that don't exist yet, canonicalize the parent
        if let Some(parent) = path.parent() {
            if parent.exists() {
                let canonical_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
                return canonical_parent.join(path.file_name().unwrap_or_default());
            }
        }
        path.to_path_buf()
    }

    /// Validate a path for writing: worktree only
    pub fn validate_write_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let normalized = self.normalize_path(path);

        if !self.sandbox_enabled {
            return Ok(normalized);
        }

        let canonical = Self::canonicalize_lenient(&normalized);
        let worktree_canonical = self.worktree.canonicalize().unwrap_or_else(|_| self.worktree.clone());

        if canonical.starts_with(&worktree_canonical) {
            Ok(canonical)
        } else {
            Err(ToolError::SandboxViolation {
                path: path.to_path_buf(),
                worktree: self.worktree.clone(),
            })
        }
    }

    /// Validate a path for reading: worktree or a permitted shared root
    pub fn validate_read_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let normalized = self.normalize_path(path);

        if !self.sandbox_enabled {
            return Ok(normalized);
        }

        let canonical = Self::canonicalize_lenient(&normalized);
        let worktree_canonical = self.worktree.canonicalize().unwrap_or_else(|_| self.worktree.clone());

        if canonical.starts_with(&worktree_canonical) {
            return Ok(canonical);
        }

        for root in &self.shared_roots {
            let root_canonical = root.canonicalize().unwrap_or_else(|_| root.clone());
            if canonical.starts_with(&root_canonical) {
                return Ok(canonical);
            }
        }

        Err(ToolError::SandboxViolation {
            path: path.to_path_buf(),
            worktree: self.worktree.clone(),
        })
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("worktree", &self.worktree)
            .field("task_id", &self.task_id)
            .field("shared_roots", &self.shared_roots)
            .field("sandbox_enabled", &self.sandbox_enabled)
            .finish()
    }
}
