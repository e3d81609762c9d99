//! ControlPlane - the create/pause/resume/cancel/replan/resolve surface
//!
//! Transport-agnostic: an HTTP+WebSocket layer (or the CLI) calls these
//! methods directly. The control plane owns the registry of live dispatch
//! loops; everything else goes through the store and checkpointer so a
//! restarted process can pick any run back up.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, Event, EventType};
use crate::checkpoint::Checkpointer;
use crate::config::Config;
use crate::dispatch::DispatchLoop;
use crate::domain::{PendingResolution, Run, RunStatus, Task, TaskPhase, TaskStatus, WorkerProfile};
use crate::llm::{LlmInvoker, Message};
use crate::state::{RunPatch, StoreError, TaskStore};

/// Errors surfaced by control-plane operations, with stable kind
/// identifiers for the wire surface
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {0} is not waiting for resolution")]
    NotWaitingHuman(String),

    #[error("Run {0} is not paused")]
    NotPaused(String),

    #[error("Run {0} already has a live dispatch loop")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Persistence failure: {0}")]
    Persist(String),
}

impl ControlError {
    /// Stable error-kind identifier
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunNotFound(_) => "run_not_found",
            Self::TaskNotFound(_) => "task_not_found",
            Self::NotWaitingHuman(_) => "not_waiting_human",
            Self::NotPaused(_) => "not_paused",
            Self::AlreadyRunning(_) => "already_running",
            Self::Store(e) => e.kind(),
            Self::Persist(_) => "persist_failure",
        }
    }
}

/// Dependency edit applied through update_task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_dependency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_dependency: Option<String>,
}

/// Resolution actions for a waiting_human task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolveAction {
    /// Reset retries, optionally amend the task, and re-plan it
    Retry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified_description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified_criteria: Option<Vec<String>>,
    },
    /// Abandon the task and insert a replacement, rewiring dependents
    SpawnNewTask {
        title: String,
        description: String,
        phase: TaskPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<WorkerProfile>,
    },
    /// Abandon the task; dependents re-evaluate
    Abandon,
}

/// A resolve command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub task_id: String,
    #[serde(flatten)]
    pub action: ResolveAction,
}

/// Pending HITL payload returned by get_interrupts
#[derive(Debug, Clone, Serialize)]
pub struct InterruptPayload {
    pub interrupted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<InterruptEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterruptEntry {
    pub task: Task,
    pub pending_resolution: Option<PendingResolution>,
}

/// The control plane: run lifecycle and HITL surface
pub struct ControlPlane {
    store: TaskStore,
    checkpointer: Checkpointer,
    broadcaster: Broadcaster,
    invoker: Arc<dyn LlmInvoker>,
    config: Arc<Config>,
    loops: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ControlPlane {
    pub fn new(
        store: TaskStore,
        checkpointer: Checkpointer,
        broadcaster: Broadcaster,
        invoker: Arc<dyn LlmInvoker>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            checkpointer,
            broadcaster,
            invoker,
            config,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Create a run and start its dispatch loop
    pub async fn create_run(
        &self,
        objective: impl Into<String>,
        spec: Option<serde_json::Map<String, serde_json::Value>>,
        workspace: impl Into<std::path::PathBuf>,
    ) -> Result<String, ControlError> {
        let mut run = Run::new(objective, workspace);
        if let Some(spec) = spec {
            run.spec = spec;
        }
        let run_id = run.run_id.clone();
        info!(%run_id, "Creating run");

        self.store.create_run(run.clone()).await?;
        self.checkpointer
            .save(&run)
            .map_err(|e| ControlError::Persist(e.to_string()))?;
        self.broadcaster
            .publish(Event::new(EventType::RunListUpdate, &run_id, serde_json::Value::Null))
            .await;

        self.start_loop(&run_id).await?;
        Ok(run_id)
    }

    /// Fetch a run snapshot without the (potentially large) task memories
    pub async fn get_run(&self, run_id: &str) -> Result<Run, ControlError> {
        let mut run = self.load_run(run_id).await?;
        run.task_memories.clear();
        Ok(run)
    }

    /// Page through run summaries
    pub fn list_runs(&self, limit: usize, offset: usize) -> Result<runstore::RunPage, ControlError> {
        let limit = limit.clamp(1, 100);
        self.checkpointer
            .list(limit, offset)
            .map_err(|e| ControlError::Persist(e.to_string()))
    }

    /// Lazily fetch one task's message history
    pub async fn get_task_memories(&self, run_id: &str, task_id: &str) -> Result<Vec<Message>, ControlError> {
        let run = self.load_run(run_id).await?;
        if run.task(task_id).is_none() {
            return Err(ControlError::TaskNotFound(task_id.to_string()));
        }
        Ok(run.task_memories.get(task_id).cloned().unwrap_or_default())
    }

    /// Cooperative pause: the loop finishes its iteration and stops
    pub async fn pause(&self, run_id: &str) -> Result<(), ControlError> {
        debug!(%run_id, "pause: called");
        self.ensure_exists(run_id).await?;
        self.store
            .apply(run_id, RunPatch::new().with_status(RunStatus::Paused))
            .await?;
        Ok(())
    }

    /// Resume a paused run
    pub async fn resume(&self, run_id: &str) -> Result<(), ControlError> {
        debug!(%run_id, "resume: called");
        let run = self.load_run(run_id).await?;
        if run.status != RunStatus::Paused {
            return Err(ControlError::NotPaused(run_id.to_string()));
        }
        self.ensure_in_store(&run).await?;
        self.store
            .apply(run_id, RunPatch::new().with_status(RunStatus::Running))
            .await?;
        self.start_loop(run_id).await
    }

    /// Hard cancel: every job unwinds and the run ends in cancelled
    pub async fn cancel(&self, run_id: &str) -> Result<(), ControlError> {
        debug!(%run_id, "cancel: called");
        let run = self.load_run(run_id).await?;
        self.ensure_in_store(&run).await?;
        self.store
            .apply(run_id, RunPatch::new().with_status(RunStatus::Cancelled))
            .await?;

        // A run without a live loop still needs its terminal state persisted
        if !self.loop_is_live(run_id).await {
            let run = self.store.get_run_required(run_id).await?;
            self.checkpointer
                .save(&run)
                .map_err(|e| ControlError::Persist(e.to_string()))?;
        }
        Ok(())
    }

    /// Re-enter the dispatch loop from the last checkpoint
    pub async fn restart(&self, run_id: &str) -> Result<(), ControlError> {
        debug!(%run_id, "restart: called");
        let run = self.load_run(run_id).await?;
        self.ensure_in_store(&run).await?;
        self.store
            .apply(run_id, RunPatch::new().with_status(RunStatus::Running))
            .await?;
        self.start_loop(run_id).await
    }

    /// Ask the director to re-run plan integration
    pub async fn replan(&self, run_id: &str) -> Result<(), ControlError> {
        debug!(%run_id, "replan: called");
        self.ensure_exists(run_id).await?;
        self.store
            .apply(run_id, RunPatch::new().with_replan_requested(true))
            .await?;
        Ok(())
    }

    /// Dependency edits only; the reducer rejects cycles
    pub async fn update_task(
        &self,
        run_id: &str,
        task_id: &str,
        patch: TaskPatchRequest,
    ) -> Result<(), ControlError> {
        debug!(%run_id, %task_id, "update_task: called");
        let run = self.load_run(run_id).await?;
        self.ensure_in_store(&run).await?;
        let mut task = run
            .task(task_id)
            .cloned()
            .ok_or_else(|| ControlError::TaskNotFound(task_id.to_string()))?;

        if let Some(dep) = patch.add_dependency {
            if run.task(&dep).is_none() {
                return Err(ControlError::TaskNotFound(dep));
            }
            if !task.depends_on.contains(&dep) {
                task.depends_on.push(dep);
            }
        }
        if let Some(dep) = patch.remove_dependency {
            task.depends_on.retain(|d| *d != dep);
        }

        self.store.apply(run_id, RunPatch::new().with_task(task)).await?;
        self.persist(run_id).await
    }

    /// Mark a task abandoned; dependents re-evaluate on the next director
    /// pass
    pub async fn abandon_task(&self, run_id: &str, task_id: &str) -> Result<(), ControlError> {
        debug!(%run_id, %task_id, "abandon_task: called");
        let run = self.load_run(run_id).await?;
        self.ensure_in_store(&run).await?;
        let mut task = run
            .task(task_id)
            .cloned()
            .ok_or_else(|| ControlError::TaskNotFound(task_id.to_string()))?;

        task.status = TaskStatus::Abandoned;
        task.pending_resolution = None;
        self.store.apply(run_id, RunPatch::new().with_task(task)).await?;
        self.persist(run_id).await
    }

    /// Pending HITL payload, if any
    pub async fn get_interrupts(&self, run_id: &str) -> Result<InterruptPayload, ControlError> {
        let run = self.load_run(run_id).await?;
        let data: Vec<InterruptEntry> = run
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::WaitingHuman)
            .map(|t| InterruptEntry {
                task: t.clone(),
                pending_resolution: t.pending_resolution.clone(),
            })
            .collect();

        Ok(InterruptPayload {
            interrupted: !data.is_empty(),
            data,
        })
    }

    /// The sole way out of waiting_human
    ///
    /// A second resolve for the same task is rejected: once resolved, the
    /// task is no longer waiting.
    pub async fn resolve(&self, run_id: &str, resolution: Resolution) -> Result<(), ControlError> {
        info!(%run_id, task_id = %resolution.task_id, "resolve: called");
        let run = self.load_run(run_id).await?;
        self.ensure_in_store(&run).await?;

        let task = run
            .task(&resolution.task_id)
            .cloned()
            .ok_or_else(|| ControlError::TaskNotFound(resolution.task_id.clone()))?;
        if task.status != TaskStatus::WaitingHuman {
            return Err(ControlError::NotWaitingHuman(resolution.task_id.clone()));
        }

        let mut patch = RunPatch::new();
        match resolution.action {
            ResolveAction::Retry {
                modified_description,
                modified_criteria,
            } => {
                let mut retried = task;
                retried.retry_count = 0;
                retried.status = TaskStatus::Planned;
                retried.pending_resolution = None;
                retried.escalation = None;
                retried.qa_verdict = None;
                retried.worktree_path = None;
                retried.branch_name = None;
                if let Some(description) = modified_description {
                    retried.description = description;
                }
                if let Some(criteria) = modified_criteria {
                    retried.acceptance_criteria = criteria;
                }
                patch = patch.clear_memory(&retried.id).with_task(retried);
            }
            ResolveAction::SpawnNewTask {
                title,
                description,
                phase,
                profile,
            } => {
                let mut abandoned = task;
                abandoned.status = TaskStatus::Abandoned;
                abandoned.pending_resolution = None;
                let abandoned_id = abandoned.id.clone();

                let mut replacement = Task::new(title, phase).with_description(description);
                if let Some(profile) = profile {
                    replacement.assigned_worker_profile = profile;
                }
                replacement.depends_on = abandoned.depends_on.clone();
                let replacement_id = replacement.id.clone();

                patch = patch.with_task(abandoned).with_task(replacement);

                // Rewire dependents of the abandoned task onto the
                // replacement
                for dependent in run.dependents_of(&abandoned_id) {
                    let mut rewired = dependent.clone();
                    for dep in rewired.depends_on.iter_mut() {
                        if *dep == abandoned_id {
                            *dep = replacement_id.clone();
                        }
                    }
                    patch = patch.with_task(rewired);
                }
            }
            ResolveAction::Abandon => {
                let mut abandoned = task;
                abandoned.status = TaskStatus::Abandoned;
                abandoned.pending_resolution = None;
                patch = patch.with_task(abandoned);
            }
        }

        self.store.apply(run_id, patch).await?;
        self.persist(run_id).await?;

        // An interrupted run restarts; a still-running loop just proceeds
        let run = self.store.get_run_required(run_id).await?;
        if matches!(run.status, RunStatus::Interrupted) && !self.loop_is_live(run_id).await {
            self.store
                .apply(run_id, RunPatch::new().with_status(RunStatus::Running))
                .await?;
            self.start_loop(run_id).await?;
        }
        Ok(())
    }

    /// Spawn the dispatch loop for a run
    async fn start_loop(&self, run_id: &str) -> Result<(), ControlError> {
        let mut loops = self.loops.lock().await;
        if let Some(handle) = loops.get(run_id) {
            if !handle.is_finished() {
                return Err(ControlError::AlreadyRunning(run_id.to_string()));
            }
        }

        let mut dispatch = DispatchLoop::new(
            run_id,
            self.store.clone(),
            self.checkpointer.clone(),
            self.broadcaster.clone(),
            self.invoker.clone(),
            self.config.clone(),
        );
        let id = run_id.to_string();
        let handle = tokio::spawn(async move {
            match dispatch.run().await {
                Ok(status) => info!(run_id = %id, %status, "Dispatch loop finished"),
                Err(e) => error!(run_id = %id, error = %e, "Dispatch loop crashed"),
            }
        });
        loops.insert(run_id.to_string(), handle);
        Ok(())
    }

    async fn loop_is_live(&self, run_id: &str) -> bool {
        let loops = self.loops.lock().await;
        loops.get(run_id).map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Wait for a run's loop to finish (tests, shutdown)
    pub async fn join_loop(&self, run_id: &str) {
        let handle = {
            let mut loops = self.loops.lock().await;
            loops.remove(run_id)
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Load from the store, falling back to the checkpointer
    async fn load_run(&self, run_id: &str) -> Result<Run, ControlError> {
        if let Some(run) = self.store.get_run(run_id).await? {
            return Ok(run);
        }
        match self
            .checkpointer
            .load_by_run_id(run_id)
            .map_err(|e| ControlError::Persist(e.to_string()))?
        {
            Some(run) => Ok(run),
            None => Err(ControlError::RunNotFound(run_id.to_string())),
        }
    }

    async fn ensure_exists(&self, run_id: &str) -> Result<(), ControlError> {
        self.load_run(run_id).await.map(|_| ())
    }

    /// Re-hydrate the store from a checkpoint when the run is not resident
    async fn ensure_in_store(&self, run: &Run) -> Result<(), ControlError> {
        if self.store.get_run(&run.run_id).await?.is_none() {
            warn!(run_id = %run.run_id, "Re-hydrating run from checkpoint");
            self.store.create_run(run.clone()).await?;
        }
        Ok(())
    }

    async fn persist(&self, run_id: &str) -> Result<(), ControlError> {
        let run = self.store.get_run_required(run_id).await?;
        self.checkpointer
            .save(&run)
            .map_err(|e| ControlError::Persist(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockInvoker;
    use runstore::SqliteBackend;

    fn plane() -> ControlPlane {
        ControlPlane::new(
            TaskStore::spawn(),
            Checkpointer::with_backend(Arc::new(SqliteBackend::open_in_memory().unwrap())),
            Broadcaster::new(),
            Arc::new(MockInvoker::new(vec![])),
            Arc::new(Config::default()),
        )
    }

    async fn seeded_run(plane: &ControlPlane, tasks: Vec<Task>, status: RunStatus) -> String {
        let temp = tempfile::tempdir().unwrap();
        let mut run = Run::new("control objective", temp.path());
        run.tasks = tasks;
        run.status = status;
        let run_id = run.run_id.clone();
        plane.store.create_run(run.clone()).await.unwrap();
        plane.checkpointer.save(&run).unwrap();
        // Leak the tempdir so the workspace outlives the test setup
        std::mem::forget(temp);
        run_id
    }

    fn waiting_task(id: &str) -> Task {
        let mut t = Task::with_id(id, id, TaskPhase::Build);
        t.status = TaskStatus::WaitingHuman;
        t.retry_count = 4;
        t.pending_resolution = Some(PendingResolution {
            reason: "phoenix retries exhausted".to_string(),
            failure_context: "it kept failing".to_string(),
            retry_count: 4,
            escalation: None,
            created_at: chrono::Utc::now(),
        });
        t
    }

    #[tokio::test]
    async fn test_get_run_strips_memories() {
        let plane = plane();
        let run_id = seeded_run(&plane, vec![], RunStatus::Paused).await;
        plane
            .store
            .apply(
                &run_id,
                RunPatch::new().append_memory("t-1", vec![Message::user("secret transcript")]),
            )
            .await
            .unwrap();

        let run = plane.get_run(&run_id).await.unwrap();
        assert!(run.task_memories.is_empty());
    }

    #[tokio::test]
    async fn test_get_task_memories() {
        let plane = plane();
        let task = Task::with_id("t-1", "t", TaskPhase::Build);
        let run_id = seeded_run(&plane, vec![task], RunStatus::Paused).await;
        plane
            .store
            .apply(&run_id, RunPatch::new().append_memory("t-1", vec![Message::user("hello")]))
            .await
            .unwrap();

        let memories = plane.get_task_memories(&run_id, "t-1").await.unwrap();
        assert_eq!(memories.len(), 1);

        let missing = plane.get_task_memories(&run_id, "nope").await;
        assert!(matches!(missing, Err(ControlError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_pause_sets_status() {
        let plane = plane();
        let run_id = seeded_run(&plane, vec![], RunStatus::Running).await;
        plane.pause(&run_id).await.unwrap();

        let run = plane.store.get_run_required(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let plane = plane();
        let run_id = seeded_run(&plane, vec![], RunStatus::Running).await;
        let result = plane.resume(&run_id).await;
        assert!(matches!(result, Err(ControlError::NotPaused(_))));
    }

    #[tokio::test]
    async fn test_update_task_rejects_cycles() {
        let plane = plane();
        let a = Task::with_id("a", "a", TaskPhase::Build);
        let b = Task::with_id("b", "b", TaskPhase::Build).with_dependency("a");
        let run_id = seeded_run(&plane, vec![a, b], RunStatus::Paused).await;

        let result = plane
            .update_task(
                &run_id,
                "a",
                TaskPatchRequest {
                    add_dependency: Some("b".to_string()),
                    remove_dependency: None,
                },
            )
            .await;

        match result {
            Err(ControlError::Store(e)) => assert_eq!(e.kind(), "cycle_detected"),
            other => panic!("expected cycle rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_update_task_add_and_remove_dependency() {
        let plane = plane();
        let a = Task::with_id("a", "a", TaskPhase::Build);
        let b = Task::with_id("b", "b", TaskPhase::Build);
        let run_id = seeded_run(&plane, vec![a, b], RunStatus::Paused).await;

        plane
            .update_task(
                &run_id,
                "b",
                TaskPatchRequest {
                    add_dependency: Some("a".to_string()),
                    remove_dependency: None,
                },
            )
            .await
            .unwrap();
        let run = plane.store.get_run_required(&run_id).await.unwrap();
        assert_eq!(run.task("b").unwrap().depends_on, vec!["a".to_string()]);

        plane
            .update_task(
                &run_id,
                "b",
                TaskPatchRequest {
                    add_dependency: None,
                    remove_dependency: Some("a".to_string()),
                },
            )
            .await
            .unwrap();
        let run = plane.store.get_run_required(&run_id).await.unwrap();
        assert!(run.task("b").unwrap().depends_on.is_empty());
    }

    #[tokio::test]
    async fn test_get_interrupts() {
        let plane = plane();
        let run_id = seeded_run(&plane, vec![waiting_task("t-1")], RunStatus::Interrupted).await;

        let payload = plane.get_interrupts(&run_id).await.unwrap();
        assert!(payload.interrupted);
        assert_eq!(payload.data.len(), 1);
        assert_eq!(payload.data[0].task.id, "t-1");
        assert!(payload.data[0].pending_resolution.is_some());
    }

    #[tokio::test]
    async fn test_resolve_retry_resets_task() {
        let plane = plane();
        let run_id = seeded_run(&plane, vec![waiting_task("t-1")], RunStatus::Paused).await;

        plane
            .resolve(
                &run_id,
                Resolution {
                    task_id: "t-1".to_string(),
                    action: ResolveAction::Retry {
                        modified_description: Some("try the other approach".to_string()),
                        modified_criteria: None,
                    },
                },
            )
            .await
            .unwrap();

        let run = plane.store.get_run_required(&run_id).await.unwrap();
        let task = run.task("t-1").unwrap();
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.status, TaskStatus::Planned);
        assert_eq!(task.description, "try the other approach");
        assert!(task.pending_resolution.is_none());

        plane.join_loop(&run_id).await;
    }

    #[tokio::test]
    async fn test_resolve_twice_rejected() {
        let plane = plane();
        let run_id = seeded_run(&plane, vec![waiting_task("t-1")], RunStatus::Paused).await;

        let resolution = Resolution {
            task_id: "t-1".to_string(),
            action: ResolveAction::Abandon,
        };
        plane.resolve(&run_id, resolution.clone()).await.unwrap();

        let second = plane.resolve(&run_id, resolution).await;
        match second {
            Err(ControlError::NotWaitingHuman(_)) => {}
            other => panic!("expected idempotence rejection, got {:?}", other.map(|_| ())),
        }

        plane.join_loop(&run_id).await;
    }

    #[tokio::test]
    async fn test_resolve_spawn_new_task_rewires_dependents() {
        let plane = plane();
        let failed = waiting_task("t-old");
        let mut dependent = Task::with_id("t-child", "child", TaskPhase::Test).with_dependency("t-old");
        dependent.status = TaskStatus::Blocked;
        let run_id = seeded_run(&plane, vec![failed, dependent], RunStatus::Paused).await;

        plane
            .resolve(
                &run_id,
                Resolution {
                    task_id: "t-old".to_string(),
                    action: ResolveAction::SpawnNewTask {
                        title: "replacement".to_string(),
                        description: "take two".to_string(),
                        phase: TaskPhase::Build,
                        profile: None,
                    },
                },
            )
            .await
            .unwrap();

        let run = plane.store.get_run_required(&run_id).await.unwrap();
        assert_eq!(run.task("t-old").unwrap().status, TaskStatus::Abandoned);

        let replacement = run.tasks.iter().find(|t| t.title == "replacement").unwrap();
        let child = run.task("t-child").unwrap();
        assert_eq!(child.depends_on, vec![replacement.id.clone()]);

        plane.join_loop(&run_id).await;
    }

    #[tokio::test]
    async fn test_abandon_task() {
        let plane = plane();
        let task = Task::with_id("t-1", "t", TaskPhase::Build);
        let run_id = seeded_run(&plane, vec![task], RunStatus::Paused).await;

        plane.abandon_task(&run_id, "t-1").await.unwrap();
        let run = plane.store.get_run_required(&run_id).await.unwrap();
        assert_eq!(run.task("t-1").unwrap().status, TaskStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_replan_sets_flag() {
        let plane = plane();
        let run_id = seeded_run(&plane, vec![], RunStatus::Paused).await;

        plane.replan(&run_id).await.unwrap();
        let run = plane.store.get_run_required(&run_id).await.unwrap();
        assert!(run.replan_requested);
    }

    #[tokio::test]
    async fn test_list_runs_pages() {
        let plane = plane();
        for _ in 0..3 {
            seeded_run(&plane, vec![], RunStatus::Paused).await;
        }

        let page = plane.list_runs(2, 0).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_unknown_run_errors() {
        let plane = plane();
        assert!(matches!(plane.get_run("missing").await, Err(ControlError::RunNotFound(_))));
        assert!(matches!(plane.pause("missing").await, Err(ControlError::RunNotFound(_))));
    }
}
