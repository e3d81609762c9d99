//! Checkpointer - durable snapshots of run state
//!
//! Bridges the domain [`Run`] to a [`runstore`] backend. Every persistent
//! field serializes into the snapshot; process-local handles (worktree
//! manager, invoker, config) are injected services and never appear here,
//! so load-after-save reconstructs an equivalent run.

use std::sync::Arc;

use eyre::{Context, Result};
use runstore::{CheckpointBackend, CheckpointKey, FileBackend, RunPage, RunSummary, SqliteBackend};
use tracing::{debug, info};

use crate::config::{CheckpointBackendKind, StorageConfig};
use crate::domain::Run;

/// Durable snapshot store for runs
#[derive(Clone)]
pub struct Checkpointer {
    backend: Arc<dyn CheckpointBackend>,
}

impl Checkpointer {
    /// Build from storage configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        debug!(backend = ?config.backend, "Checkpointer::from_config: called");
        let backend: Arc<dyn CheckpointBackend> = match config.backend {
            CheckpointBackendKind::File => {
                Arc::new(FileBackend::open(config.state_dir.join("checkpoints")).context("open file backend")?)
            }
            CheckpointBackendKind::Sqlite => {
                Arc::new(SqliteBackend::open(config.state_dir.join("conductor.db")).context("open sqlite backend")?)
            }
        };
        info!("Checkpointer ready");
        Ok(Self { backend })
    }

    /// Wrap an existing backend (tests)
    pub fn with_backend(backend: Arc<dyn CheckpointBackend>) -> Self {
        Self { backend }
    }

    /// Persist a snapshot of the run
    pub fn save(&self, run: &Run) -> Result<()> {
        debug!(run_id = %run.run_id, "Checkpointer::save: called");
        let key = CheckpointKey::new(&run.run_id, &run.thread_id);
        let snapshot = serde_json::to_vec(run).context("serialize run snapshot")?;
        let summary = summarize(run);
        self.backend.put(&key, &snapshot, &summary).context("persist run snapshot")?;
        debug!(run_id = %run.run_id, bytes = snapshot.len(), "Checkpointer::save: persisted");
        Ok(())
    }

    /// Load the snapshot for a run, if one exists
    pub fn load(&self, run_id: &str, thread_id: &str) -> Result<Option<Run>> {
        debug!(%run_id, %thread_id, "Checkpointer::load: called");
        let key = CheckpointKey::new(run_id, thread_id);
        match self.backend.get(&key).context("read run snapshot")? {
            Some(bytes) => {
                let run: Run = serde_json::from_slice(&bytes).context("deserialize run snapshot")?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    /// Load by run_id alone, resolving the thread_id through the summary row
    pub fn load_by_run_id(&self, run_id: &str) -> Result<Option<Run>> {
        debug!(%run_id, "Checkpointer::load_by_run_id: called");
        match self.backend.get_summary(run_id).context("read run summary")? {
            Some(summary) => self.load(run_id, &summary.thread_id),
            None => Ok(None),
        }
    }

    /// Remove a run's snapshot and summary
    pub fn delete(&self, run_id: &str, thread_id: &str) -> Result<()> {
        debug!(%run_id, "Checkpointer::delete: called");
        self.backend
            .delete(&CheckpointKey::new(run_id, thread_id))
            .context("delete run snapshot")
    }

    /// Page through run summaries for list views
    pub fn list(&self, limit: usize, offset: usize) -> Result<RunPage> {
        debug!(limit, offset, "Checkpointer::list: called");
        self.backend.list_runs(limit, offset).context("list runs")
    }

    /// One summary row
    pub fn summary(&self, run_id: &str) -> Result<Option<RunSummary>> {
        self.backend.get_summary(run_id).context("read run summary")
    }
}

fn summarize(run: &Run) -> RunSummary {
    RunSummary {
        run_id: run.run_id.clone(),
        thread_id: run.thread_id.clone(),
        objective: run.objective.clone(),
        status: run.status.to_string(),
        workspace_path: run.workspace.display().to_string(),
        task_counts: serde_json::to_value(run.task_counts()).unwrap_or(serde_json::Value::Null),
        created_at: run.created_at.to_rfc3339(),
        updated_at: run.updated_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Insight, Task, TaskPhase, TaskStatus};
    use crate::llm::Message;
    use runstore::SqliteBackend;

    fn checkpointer() -> Checkpointer {
        Checkpointer::with_backend(Arc::new(SqliteBackend::open_in_memory().unwrap()))
    }

    fn populated_run() -> Run {
        let mut run = Run::new("round trip objective", "/tmp/ws");
        let mut task = Task::with_id("t-1", "first task", TaskPhase::Build).with_dependency("t-0");
        task.status = TaskStatus::Complete;
        run.tasks.push(Task::with_id("t-0", "zeroth", TaskPhase::Plan));
        run.tasks.push(task);
        run.insights.push(Insight::new(Some("t-1".to_string()), "something learned"));
        run.task_memories
            .insert("t-1".to_string(), vec![Message::user("hi"), Message::assistant("done")]);
        run
    }

    #[test]
    fn test_save_load_round_trip_is_structural_identity() {
        let cp = checkpointer();
        let run = populated_run();
        cp.save(&run).unwrap();

        let loaded = cp.load(&run.run_id, &run.thread_id).unwrap().unwrap();
        // Compare through the serialized form: every persistent field must
        // survive
        let a = serde_json::to_value(&run).unwrap();
        let b = serde_json::to_value(&loaded).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_missing_is_none() {
        let cp = checkpointer();
        assert!(cp.load("missing", "missing").unwrap().is_none());
        assert!(cp.load_by_run_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_load_by_run_id_resolves_thread() {
        let cp = checkpointer();
        let mut run = populated_run();
        run.thread_id = format!("{}-thread-2", run.run_id);
        cp.save(&run).unwrap();

        let loaded = cp.load_by_run_id(&run.run_id).unwrap().unwrap();
        assert_eq!(loaded.thread_id, run.thread_id);
    }

    #[test]
    fn test_summary_reflects_task_counts() {
        let cp = checkpointer();
        let run = populated_run();
        cp.save(&run).unwrap();

        let summary = cp.summary(&run.run_id).unwrap().unwrap();
        assert_eq!(summary.status, "running");
        assert_eq!(summary.task_counts["complete"], 1);
        assert_eq!(summary.task_counts["planned"], 1);
    }

    #[test]
    fn test_list_pages() {
        let cp = checkpointer();
        for i in 0..3 {
            let mut run = Run::new(format!("objective {}", i), "/tmp/ws");
            run.run_id = format!("run-{}", i);
            run.thread_id = run.run_id.clone();
            cp.save(&run).unwrap();
        }

        let page = cp.list(2, 0).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
    }
}
