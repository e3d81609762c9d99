//! Worktree manager: per-task isolated checkouts of a trunk-based repository
//!
//! Every task gets its own branch (`task/<id>`, `task/<id>/retry-<n>`) and
//! worktree directory, so concurrent workers write freely without colliding.
//! Anything that touches trunk (rebase target advance, the merge itself)
//! serializes behind a process-wide mutex; that lock is the only cross-task
//! coordination the engine needs.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("Worktree not found: {0}")]
    NotFound(String),

    #[error("Git command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Git command failed: {0}")]
    GitError(String),
}

/// Outcome of a rebase or merge
#[derive(Debug, Clone)]
pub enum MergeResult {
    /// Operation succeeded; for merges, the trunk commit id
    Success { commit: Option<String> },
    /// Conflicts need resolution; the worktree holds the conflict state
    Conflict {
        conflicting_files: Vec<String>,
        message: String,
    },
    /// Non-conflict failure
    Failed { message: String },
}

impl MergeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn conflicting_files(&self) -> &[String] {
        match self {
            Self::Conflict { conflicting_files, .. } => conflicting_files,
            _ => &[],
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Conflict { message, .. } => Some(message),
            Self::Failed { message } => Some(message),
        }
    }
}

/// Configuration for the worktree manager
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// Per-run base directory for worktrees
    pub base_dir: PathBuf,

    /// The trunk checkout
    pub repo_root: PathBuf,

    /// Trunk branch name
    pub trunk: String,

    /// Timeout for individual git commands
    pub command_timeout: Duration,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/tmp/conductor/worktrees"),
            repo_root: PathBuf::from("."),
            trunk: "main".to_string(),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Information about a created worktree
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub task_id: String,
    pub path: PathBuf,
    pub branch: String,
}

/// Report from restart reconciliation
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Orphaned worktrees deleted
    pub orphans_removed: Vec<String>,
    /// Task ids that should be active but have no worktree on disk
    pub missing: Vec<String>,
}

/// The one lock every trunk-modifying operation takes, process-wide
fn trunk_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Manager for per-task git worktrees and trunk merges
pub struct WorktreeManager {
    config: WorktreeConfig,
}

impl WorktreeManager {
    pub fn new(config: WorktreeConfig) -> Self {
        debug!(?config, "WorktreeManager::new: called");
        Self { config }
    }

    /// Branch name for a task attempt
    pub fn branch_name(task_id: &str, retry_number: u32) -> String {
        if retry_number == 0 {
            format!("task/{}", task_id)
        } else {
            format!("task/{}/retry-{}", task_id, retry_number)
        }
    }

    /// Get worktree path for a task
    pub fn worktree_path(&self, task_id: &str) -> PathBuf {
        self.config.base_dir.join(task_id)
    }

    /// Check if a worktree exists on disk
    pub fn exists(&self, task_id: &str) -> bool {
        self.worktree_path(task_id).exists()
    }

    /// Run a git command with the configured timeout, capturing stderr
    async fn git(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output, WorktreeError> {
        debug!(?args, dir = %dir.display(), "WorktreeManager::git: called");
        let fut = Command::new("git").args(args).current_dir(dir).output();
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(WorktreeError::GitError(e.to_string())),
            Err(_) => {
                debug!(?args, "WorktreeManager::git: timed out");
                Err(WorktreeError::Timeout(self.config.command_timeout))
            }
        }
    }

    /// Create a worktree for a task attempt
    ///
    /// Branches off the current trunk head, or off `base_branch` when given
    /// (a merger re-creating the conflicted state of a failed task).
    pub async fn create_worktree(
        &self,
        task_id: &str,
        retry_number: u32,
        base_branch: Option<&str>,
    ) -> Result<WorktreeInfo, WorktreeError> {
        debug!(%task_id, retry_number, ?base_branch, "WorktreeManager::create_worktree: called");

        if let Err(e) = tokio::fs::create_dir_all(&self.config.base_dir).await {
            return Err(WorktreeError::CreateFailed(format!("Failed to create base dir: {}", e)));
        }

        let worktree_path = self.worktree_path(task_id);
        let branch = Self::branch_name(task_id, retry_number);
        let worktree_str = worktree_path.to_string_lossy().to_string();

        let output = match base_branch {
            // Re-materializing an existing attempt branch (a merger
            // recreating the conflicted state): check it out as-is
            Some(base) if base == branch => {
                self.git(&self.config.repo_root, &["worktree", "add", &worktree_str, &branch])
                    .await?
            }
            Some(base) => {
                self.git(
                    &self.config.repo_root,
                    &["worktree", "add", &worktree_str, "-b", &branch, base],
                )
                .await?
            }
            None => {
                // Refs from earlier attempts collide in the ref namespace:
                // `task/<id>` blocks `task/<id>/retry-n` and vice versa
                self.clear_stale_branches(task_id).await;
                self.git(
                    &self.config.repo_root,
                    &["worktree", "add", &worktree_str, "-b", &branch, &self.config.trunk],
                )
                .await?
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("WorktreeManager::create_worktree: git worktree add failed");
            return Err(WorktreeError::CreateFailed(stderr.to_string()));
        }

        info!(%task_id, %branch, path = %worktree_path.display(), "Created worktree");

        Ok(WorktreeInfo {
            task_id: task_id.to_string(),
            path: worktree_path,
            branch,
        })
    }

    /// Delete every branch ref of this task's earlier attempts
    async fn clear_stale_branches(&self, task_id: &str) {
        let plain = format!("task/{}", task_id);
        let retries = format!("task/{}/*", task_id);
        let listed = self
            .git(&self.config.repo_root, &["branch", "--list", &plain, &retries])
            .await;
        if let Ok(output) = listed {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                let name = line.trim().trim_start_matches("* ").trim_start_matches("+ ");
                if name.is_empty() {
                    continue;
                }
                debug!(branch = %name, "WorktreeManager::clear_stale_branches: deleting");
                let _ = self.git(&self.config.repo_root, &["branch", "-D", name]).await;
            }
        }
    }

    /// Stage everything in the worktree and commit on the task branch
    ///
    /// Returns the commit id, or `None` when there was nothing to commit.
    pub async fn commit_changes(&self, task_id: &str, message: &str) -> Result<Option<String>, WorktreeError> {
        debug!(%task_id, %message, "WorktreeManager::commit_changes: called");
        let worktree = self.worktree_path(task_id);
        if !worktree.exists() {
            return Err(WorktreeError::NotFound(task_id.to_string()));
        }

        let status = self.git(&worktree, &["status", "--porcelain"]).await?;
        if status.stdout.is_empty() {
            debug!(%task_id, "WorktreeManager::commit_changes: nothing to commit");
            return Ok(None);
        }

        let add = self.git(&worktree, &["add", "-A"]).await?;
        if !add.status.success() {
            return Err(WorktreeError::GitError(
                String::from_utf8_lossy(&add.stderr).to_string(),
            ));
        }

        let commit = self.git(&worktree, &["commit", "-m", message]).await?;
        if !commit.status.success() {
            return Err(WorktreeError::GitError(
                String::from_utf8_lossy(&commit.stderr).to_string(),
            ));
        }

        let head = self.git(&worktree, &["rev-parse", "HEAD"]).await?;
        let commit_id = String::from_utf8_lossy(&head.stdout).trim().to_string();
        info!(%task_id, commit = %commit_id, "Committed worktree changes");
        Ok(Some(commit_id))
    }

    /// List files left conflicted in a directory
    async fn conflicting_files(&self, dir: &Path) -> Vec<String> {
        match self.git(dir, &["diff", "--name-only", "--diff-filter=U"]).await {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Rebase the task branch onto the current trunk head
    ///
    /// On conflict the worktree is left mid-rebase so a merger can reconcile
    /// both sides and continue; callers that want a clean tree must call
    /// [`abort_rebase`](Self::abort_rebase).
    pub async fn rebase_on_trunk(&self, task_id: &str) -> Result<MergeResult, WorktreeError> {
        debug!(%task_id, "WorktreeManager::rebase_on_trunk: called");
        let worktree = self.worktree_path(task_id);
        if !worktree.exists() {
            return Err(WorktreeError::NotFound(task_id.to_string()));
        }

        let _guard = trunk_lock().lock().await;
        debug!(%task_id, "WorktreeManager::rebase_on_trunk: trunk lock acquired");

        let output = self.git(&worktree, &["rebase", &self.config.trunk]).await?;

        if output.status.success() {
            info!(%task_id, "Rebase onto trunk succeeded");
            return Ok(MergeResult::Success { commit: None });
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let conflicts = self.conflicting_files(&worktree).await;
        if !conflicts.is_empty() {
            warn!(%task_id, files = conflicts.len(), "Rebase conflict, worktree left mid-rebase");
            return Ok(MergeResult::Conflict {
                conflicting_files: conflicts,
                message: stderr,
            });
        }

        // Failed without conflict markers: abort to leave a usable worktree
        let _ = self.git(&worktree, &["rebase", "--abort"]).await;
        debug!(%task_id, "WorktreeManager::rebase_on_trunk: aborted non-conflict failure");
        Ok(MergeResult::Failed { message: stderr })
    }

    /// Abort an in-progress rebase in the task's worktree
    pub async fn abort_rebase(&self, task_id: &str) -> Result<(), WorktreeError> {
        debug!(%task_id, "WorktreeManager::abort_rebase: called");
        let worktree = self.worktree_path(task_id);
        if !worktree.exists() {
            return Ok(());
        }
        let _ = self.git(&worktree, &["rebase", "--abort"]).await;
        Ok(())
    }

    /// Merge the task branch into trunk with a non-fast-forward merge commit
    ///
    /// Serialized behind the process-wide trunk lock. The merge commit
    /// message carries a `[task:<id>]` attribution marker. On conflict the
    /// trunk merge is aborted immediately so trunk stays clean.
    pub async fn merge_to_trunk(&self, task_id: &str, branch: &str, title: &str) -> Result<MergeResult, WorktreeError> {
        debug!(%task_id, %branch, "WorktreeManager::merge_to_trunk: called");

        let _guard = trunk_lock().lock().await;
        debug!(%task_id, "WorktreeManager::merge_to_trunk: trunk lock acquired");

        let repo = &self.config.repo_root;

        let checkout = self.git(repo, &["checkout", &self.config.trunk]).await?;
        if !checkout.status.success() {
            return Ok(MergeResult::Failed {
                message: String::from_utf8_lossy(&checkout.stderr).to_string(),
            });
        }

        let message = format!("Merge task: {} [task:{}]", title, task_id);
        let merge = self.git(repo, &["merge", "--no-ff", branch, "-m", &message]).await?;

        if !merge.status.success() {
            let stderr = String::from_utf8_lossy(&merge.stderr).to_string();
            let stdout = String::from_utf8_lossy(&merge.stdout).to_string();
            let conflicts = self.conflicting_files(repo).await;

            // Trunk must never sit mid-merge
            let _ = self.git(repo, &["merge", "--abort"]).await;
            debug!(%task_id, "WorktreeManager::merge_to_trunk: merge aborted");

            if !conflicts.is_empty() || stdout.contains("CONFLICT") || stderr.contains("CONFLICT") {
                warn!(%task_id, "Merge conflict against trunk");
                return Ok(MergeResult::Conflict {
                    conflicting_files: conflicts,
                    message: if stderr.is_empty() { stdout } else { stderr },
                });
            }

            return Ok(MergeResult::Failed {
                message: if stderr.is_empty() { stdout } else { stderr },
            });
        }

        let head = self.git(repo, &["rev-parse", "HEAD"]).await?;
        let commit = String::from_utf8_lossy(&head.stdout).trim().to_string();
        info!(%task_id, %commit, "Merged task branch into trunk");

        Ok(MergeResult::Success { commit: Some(commit) })
    }

    /// Remove a worktree directory and (optionally) its branch
    ///
    /// The branch is kept when `keep_branch` is set, for post-mortem of a
    /// failed merge.
    pub async fn cleanup_worktree(&self, task_id: &str, branch: &str, keep_branch: bool) -> Result<(), WorktreeError> {
        debug!(%task_id, %branch, keep_branch, "WorktreeManager::cleanup_worktree: called");
        let worktree_path = self.worktree_path(task_id);

        if worktree_path.exists() {
            let worktree_str = worktree_path.to_string_lossy().to_string();
            let output = self
                .git(&self.config.repo_root, &["worktree", "remove", &worktree_str, "--force"])
                .await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.contains("is not a working tree") {
                    return Err(WorktreeError::RemoveFailed(stderr.to_string()));
                }
                debug!(%task_id, "WorktreeManager::cleanup_worktree: already removed");
            }
        } else {
            warn!(%task_id, "Worktree does not exist, skipping removal");
        }

        if !keep_branch {
            let _ = self.git(&self.config.repo_root, &["branch", "-D", branch]).await;
            debug!(%task_id, "WorktreeManager::cleanup_worktree: branch deletion attempted");
        }

        info!(%task_id, "Cleaned up worktree");
        Ok(())
    }

    /// Reconcile on-disk worktrees against the store after a restart
    ///
    /// Worktrees with no active task are deleted; active tasks with no
    /// worktree are reported so the caller can demote them to ready.
    pub async fn recover_worktrees(&self, active_task_ids: &[String]) -> Result<RecoveryReport, WorktreeError> {
        debug!(?active_task_ids, "WorktreeManager::recover_worktrees: called");
        let mut report = RecoveryReport::default();

        if self.config.base_dir.exists() {
            let mut entries = tokio::fs::read_dir(&self.config.base_dir)
                .await
                .map_err(|e| WorktreeError::GitError(e.to_string()))?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| WorktreeError::GitError(e.to_string()))? {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let task_id = entry.file_name().to_string_lossy().to_string();
                if !active_task_ids.contains(&task_id) {
                    info!(%task_id, "Removing orphaned worktree");
                    let branch = Self::branch_name(&task_id, 0);
                    if let Err(e) = self.cleanup_worktree(&task_id, &branch, false).await {
                        warn!(%task_id, error = %e, "Failed to remove orphaned worktree");
                    } else {
                        report.orphans_removed.push(task_id);
                    }
                }
            }
        }

        for task_id in active_task_ids {
            if !self.exists(task_id) {
                debug!(%task_id, "WorktreeManager::recover_worktrees: active task missing worktree");
                report.missing.push(task_id.clone());
            }
        }

        // Drop stale administrative entries for deleted directories
        let _ = self.git(&self.config.repo_root, &["worktree", "prune"]).await;

        info!(
            orphans = report.orphans_removed.len(),
            missing = report.missing.len(),
            "Worktree recovery complete"
        );
        Ok(report)
    }
}
