//! DispatchLoop - the per-run controller
//!
//! One iteration: drain completed worker jobs, run the director, dispatch
//! ready tasks into the job pool, run the strategist over awaiting_qa
//! tasks, evaluate termination, then wait briefly for new completions.
//! There are no superstep barriers: every phase operates on the freshest
//! snapshot and each mutation is checkpointed before it is broadcast.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, Event, EventType};
use crate::checkpoint::Checkpointer;
use crate::config::Config;
use crate::director::Director;
use crate::domain::{Run, RunStatus, Task, TaskStatus};
use crate::llm::{LlmInvoker, RecordingInvoker};
use crate::queue::{Completion, JobError, TaskQueue};
use crate::state::{RunPatch, TaskStore};
use crate::strategist::Strategist;
use crate::tools::ToolContext;
use crate::worker::{Worker, WorkerError, WorkerReport};
use crate::worktree::{WorktreeConfig, WorktreeManager};

/// Consecutive mutation-free iterations before the run is declared
/// deadlocked
const DEADLOCK_ITERATIONS: u32 = 10;

/// Iterations between heartbeat broadcasts
const HEARTBEAT_EVERY: u64 = 10;

type JobOutcome = Result<WorkerReport, String>;

/// The continuous controller for a single run
pub struct DispatchLoop {
    run_id: String,
    store: TaskStore,
    checkpointer: Checkpointer,
    broadcaster: Broadcaster,
    queue: TaskQueue<JobOutcome>,
    director: Director,
    strategist: Strategist,
    invoker: Arc<dyn LlmInvoker>,
    worktrees: Option<Arc<WorktreeManager>>,
    config: Arc<Config>,
}

impl DispatchLoop {
    pub fn new(
        run_id: impl Into<String>,
        store: TaskStore,
        checkpointer: Checkpointer,
        broadcaster: Broadcaster,
        invoker: Arc<dyn LlmInvoker>,
        config: Arc<Config>,
    ) -> Self {
        let run_id = run_id.into();
        Self {
            queue: TaskQueue::new(config.concurrency.max_workers),
            director: Director::new(invoker.clone(), config.director.clone()),
            strategist: Strategist::new(invoker.clone(), config.qa.clone()),
            run_id,
            store,
            checkpointer,
            broadcaster,
            invoker,
            worktrees: None,
            config,
        }
    }

    /// Drive the run until it reaches a terminal status
    pub async fn run(&mut self) -> Result<RunStatus> {
        info!(run_id = %self.run_id, "DispatchLoop starting");

        self.startup_recovery().await?;

        let mut stagnant: u32 = 0;
        let mut last_version = self.store.version(&self.run_id).await?;
        let mut iteration: u64 = 0;

        loop {
            iteration += 1;
            let mut progressed = false;

            // 1. Collect completions
            let completions = self.queue.collect_completed();
            if !completions.is_empty() {
                progressed = true;
            }
            for completion in completions {
                if let Err(e) = self.apply_completion(completion).await {
                    error!(run_id = %self.run_id, error = %e, "Failed to apply worker completion");
                    self.broadcaster
                        .publish(Event::error(&self.run_id, "worker_exception", &e.to_string()))
                        .await;
                }
            }

            // 2. Director
            let snapshot = self.store.get_run_required(&self.run_id).await?;
            if snapshot.status == RunStatus::Running {
                match self.director.tick(&snapshot).await {
                    Ok(report) => {
                        let human_needed = report.human_needed.clone();
                        if !report.patch.is_empty() {
                            self.apply_and_publish(report.patch, vec![]).await?;
                        }
                        for task_id in human_needed {
                            self.broadcaster
                                .publish(Event::new(
                                    EventType::HumanNeeded,
                                    &self.run_id,
                                    serde_json::json!({ "task_id": task_id }),
                                ))
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(run_id = %self.run_id, error = %e, "Director pass failed");
                        self.broadcaster
                            .publish(Event::error(&self.run_id, "llm_failure", &format!("director: {}", e)))
                            .await;
                    }
                }
            }

            // 3. Dispatch ready tasks
            let dispatched = self.dispatch_ready().await?;
            if dispatched > 0 {
                progressed = true;
            }

            // 4. Strategist over awaiting_qa
            self.run_strategist().await?;

            // 5. Terminate?
            let run = self.store.get_run_required(&self.run_id).await?;
            if let Some(terminal) = self.check_termination(&run).await? {
                return Ok(terminal);
            }

            // Deadlock: consecutive iterations with no state mutation and
            // nothing in flight that could still produce one
            let version = self.store.version(&self.run_id).await?;
            if version == last_version && !progressed && !self.queue.has_work() {
                stagnant += 1;
                if stagnant >= DEADLOCK_ITERATIONS {
                    warn!(run_id = %self.run_id, "No progress for {} iterations, declaring deadlock", stagnant);
                    self.finish(RunStatus::Deadlock).await?;
                    self.broadcaster
                        .publish(Event::error(&self.run_id, "deadlock", "run made no progress"))
                        .await;
                    return Ok(RunStatus::Deadlock);
                }
            } else {
                stagnant = 0;
            }
            last_version = version;

            if iteration % HEARTBEAT_EVERY == 0 {
                self.broadcaster
                    .publish(Event::new(
                        EventType::Heartbeat,
                        &self.run_id,
                        serde_json::json!({ "iteration": iteration }),
                    ))
                    .await;
            }

            // 6. Wait for completions, or idle briefly
            if self.queue.has_work() {
                self.queue.wait_for_any(Duration::from_secs(1)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    /// Reconcile disk and store state after process start
    async fn startup_recovery(&mut self) -> Result<()> {
        let run = self.store.get_run_required(&self.run_id).await?;
        let manager = self.manager_for(&run);

        let active_ids: Vec<String> = run
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Active)
            .map(|t| t.id.clone())
            .collect();

        let report = manager
            .recover_worktrees(&active_ids)
            .await
            .context("worktree recovery")?;

        // Every formerly-active task goes back to ready: its job did not
        // survive the restart
        let mut patch = RunPatch::new();
        for task_id in &active_ids {
            if let Some(task) = run.task(task_id) {
                let mut demoted = task.clone();
                demoted.status = TaskStatus::Ready;
                demoted.started_at = None;
                if report.missing.contains(task_id) {
                    demoted.worktree_path = None;
                    demoted.branch_name = None;
                }
                patch = patch.with_task(demoted);
            }
        }

        if !patch.is_empty() {
            info!(run_id = %self.run_id, demoted = active_ids.len(), "Demoted interrupted active tasks to ready");
            self.apply_and_publish(patch, vec![]).await?;
        }
        Ok(())
    }

    /// The per-run worktree manager, built lazily from the run's workspace
    fn manager_for(&mut self, run: &Run) -> Arc<WorktreeManager> {
        if let Some(manager) = &self.worktrees {
            return manager.clone();
        }
        let manager = Arc::new(WorktreeManager::new(WorktreeConfig {
            base_dir: self.config.git.worktree_base.join(&self.run_id),
            repo_root: run.workspace.clone(),
            trunk: self.config.git.trunk.clone(),
            command_timeout: Duration::from_millis(self.config.git.command_timeout_ms),
        }));
        self.worktrees = Some(manager.clone());
        manager
    }

    /// Merge one worker completion into the store: memories first, then
    /// the task record
    async fn apply_completion(&mut self, completion: Completion<JobOutcome>) -> Result<()> {
        let task_id = completion.task_id.clone();
        debug!(run_id = %self.run_id, %task_id, "DispatchLoop::apply_completion: called");

        let run = self.store.get_run_required(&self.run_id).await?;
        let Some(task) = run.task(&task_id) else {
            warn!(%task_id, "Completion for unknown task dropped");
            return Ok(());
        };
        let mut updated = task.clone();

        match completion.outcome {
            Ok(Ok(report)) => {
                // Memories land before the task record so observers never
                // see a completed task without its transcript
                if !report.messages.is_empty() {
                    let memories = RunPatch::new().append_memory(&task_id, report.messages.clone());
                    self.store.apply(&self.run_id, memories).await?;
                }

                let mut patch = RunPatch::new();
                for content in &report.insights {
                    patch = patch.with_insight(crate::domain::Insight::new(Some(task_id.clone()), content.clone()));
                }

                updated.status = report.proposed_status();
                updated.aar = Some(report.aar.clone());
                updated.result_path = report.result_path.clone().or(updated.result_path);
                updated.escalation = report.escalation.clone();
                updated.checkpoint = report.checkpoint.clone();
                if !report.suggested_tasks.is_empty() {
                    updated.suggested_tasks = report.suggested_tasks.clone();
                }
                if report.qa_verdict.is_some() {
                    updated.qa_verdict = report.qa_verdict.clone();
                }

                let events = vec![Event::task_update(
                    &self.run_id,
                    serde_json::json!({ "task_id": task_id, "status": updated.status.to_string() }),
                )];
                self.apply_and_publish(patch.with_task(updated), events).await?;
            }
            Ok(Err(message)) => {
                warn!(%task_id, %message, "Worker job failed");
                updated.status = TaskStatus::PendingFailed;
                let mut aar = updated.aar.take().unwrap_or_default();
                aar.summary = message.clone();
                updated.aar = Some(aar);

                let events = vec![Event::error(&self.run_id, "worker_exception", &message)];
                self.apply_and_publish(RunPatch::new().with_task(updated), events).await?;
            }
            Err(JobError::Cancelled) => {
                // The job unwound; the task re-dispatches cleanly
                info!(%task_id, "Worker job cancelled, returning task to ready");
                updated.status = TaskStatus::Ready;
                updated.started_at = None;
                self.apply_and_publish(RunPatch::new().with_task(updated), vec![]).await?;
            }
            Err(JobError::Panicked(message)) => {
                error!(%task_id, %message, "Worker job panicked");
                updated.status = TaskStatus::PendingFailed;
                let mut aar = updated.aar.take().unwrap_or_default();
                aar.summary = format!("worker panicked: {}", message);
                updated.aar = Some(aar);

                let events = vec![Event::error(&self.run_id, "worker_exception", &message)];
                self.apply_and_publish(RunPatch::new().with_task(updated), events).await?;
            }
        }
        Ok(())
    }

    /// Dispatch ready tasks up to the pool's free capacity, priority first
    async fn dispatch_ready(&mut self) -> Result<usize> {
        let run = self.store.get_run_required(&self.run_id).await?;
        if run.status != RunStatus::Running {
            return Ok(0);
        }

        let mut ready: Vec<Task> = run.tasks.iter().filter(|t| t.status == TaskStatus::Ready).cloned().collect();
        // Priority desc; insertion order (stable sort) breaks ties
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));

        let slots = self.queue.available_slots();
        let mut dispatched = 0;

        for task in ready.into_iter().take(slots) {
            match self.dispatch_one(&run, task).await {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    error!(run_id = %self.run_id, error = %e, "Failed to dispatch task");
                    self.broadcaster
                        .publish(Event::error(&self.run_id, "dispatch_failure", &e.to_string()))
                        .await;
                }
            }
        }

        Ok(dispatched)
    }

    async fn dispatch_one(&mut self, run: &Run, task: Task) -> Result<()> {
        debug!(task_id = %task.id, "DispatchLoop::dispatch_one: called");
        let manager = self.manager_for(run);

        // Mergers operate in the original task's conflicted worktree; every
        // other task gets a fresh checkout off trunk
        let (worktree_path, branch, commit_as) = match &task.use_worktree_task_id {
            Some(original_id) => {
                let original = run
                    .task(original_id)
                    .ok_or_else(|| eyre::eyre!("merge source task {} missing", original_id))?;
                let branch = original
                    .branch_name
                    .clone()
                    .unwrap_or_else(|| original.attempt_branch());
                if manager.exists(original_id) {
                    (manager.worktree_path(original_id), branch, original_id.clone())
                } else {
                    let info = manager
                        .create_worktree(original_id, original.retry_count, Some(&branch))
                        .await
                        .context("recreate conflicted worktree")?;
                    (info.path, info.branch, original_id.clone())
                }
            }
            None => {
                if manager.exists(&task.id) {
                    // Stale leftovers from an earlier attempt
                    let stale_branch = task.branch_name.clone().unwrap_or_else(|| task.attempt_branch());
                    let _ = manager.cleanup_worktree(&task.id, &stale_branch, false).await;
                }
                let info = manager
                    .create_worktree(&task.id, task.retry_count, None)
                    .await
                    .context("create worktree")?;
                (info.path, info.branch, task.id.clone())
            }
        };

        // Flip to active before the job exists so at-most-one-job holds
        let mut active = task.clone();
        active.status = TaskStatus::Active;
        active.started_at = Some(chrono::Utc::now());
        active.worktree_path = Some(worktree_path.clone());
        active.branch_name = Some(branch.clone());

        let events = vec![Event::task_update(
            &self.run_id,
            serde_json::json!({ "task_id": task.id, "status": "active" }),
        )];
        self.apply_and_publish(RunPatch::new().with_task(active.clone()), events).await?;

        // Per-task recording invoker: one replay file per LLM call
        let logs_dir = self.config.storage.logs_dir.join(&self.run_id).join(&task.id);
        let invoker: Arc<dyn LlmInvoker> = Arc::new(RecordingInvoker::new(self.invoker.clone(), logs_dir));
        let worker = Worker::new(invoker, self.config.concurrency.max_worker_turns);

        let briefing = render_briefing(run);
        let ctx = ToolContext::new(worktree_path, task.id.clone()).with_shared_root(run.workspace.clone());
        let manager = manager.clone();
        let job_task = active;

        let spawned = self.queue.spawn(&task.id, move |cancel| async move {
            let report = worker.execute(&job_task, &ctx, &briefing, &cancel).await;
            match report {
                Ok(mut report) => {
                    if cancel.is_cancelled() {
                        return Err("cancelled".to_string());
                    }
                    // Commit the attempt's changes on the task branch. The
                    // [task:] marker is reserved for the merge commit so
                    // trunk attribution stays unique.
                    match manager
                        .commit_changes(&commit_as, &format!("{}: {}", job_task.id, job_task.title))
                        .await
                    {
                        Ok(commit) => report.commit = commit,
                        Err(e) => return Err(format!("commit failed: {}", e)),
                    }
                    Ok(report)
                }
                Err(WorkerError::Cancelled) => Err("cancelled".to_string()),
                Err(e) => Err(e.to_string()),
            }
        });

        if !spawned {
            // Slot raced away; the director will re-evaluate the task
            warn!(task_id = %task.id, "Queue rejected job, reverting task to ready");
            let mut reverted = task.clone();
            reverted.status = TaskStatus::Ready;
            self.apply_and_publish(RunPatch::new().with_task(reverted), vec![]).await?;
        }

        Ok(())
    }

    /// Review every awaiting_qa task
    async fn run_strategist(&mut self) -> Result<()> {
        let run = self.store.get_run_required(&self.run_id).await?;
        if run.status != RunStatus::Running {
            return Ok(());
        }
        let manager = self.manager_for(&run);

        let awaiting: Vec<String> = run
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::AwaitingQa)
            .map(|t| t.id.clone())
            .collect();

        for task_id in awaiting {
            // Fresh snapshot: an earlier review may have spawned tasks
            let snapshot = self.store.get_run_required(&self.run_id).await?;
            match self.strategist.review(&snapshot, &task_id, &manager).await {
                Ok(outcome) => {
                    let mut events = Vec::new();
                    if let Some(merger_id) = &outcome.spawned_merger {
                        events.push(Event::task_update(
                            &self.run_id,
                            serde_json::json!({ "task_id": merger_id, "status": "ready", "kind": "merger" }),
                        ));
                    }
                    if outcome.merged {
                        events.push(Event::new(
                            EventType::LogMessage,
                            &self.run_id,
                            serde_json::json!({ "message": format!("task {} merged to trunk", task_id) }),
                        ));
                    }
                    if !outcome.patch.is_empty() {
                        self.apply_and_publish(outcome.patch, events).await?;
                    }
                }
                Err(e) => {
                    warn!(%task_id, error = %e, "Strategist review failed");
                    self.broadcaster
                        .publish(Event::error(&self.run_id, "llm_failure", &format!("strategist: {}", e)))
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Evaluate the run's terminal conditions
    async fn check_termination(&mut self, run: &Run) -> Result<Option<RunStatus>> {
        match run.status {
            RunStatus::Cancelled => {
                info!(run_id = %self.run_id, "Run cancelled, unwinding jobs");
                self.queue.cancel_all();
                self.finish(RunStatus::Cancelled).await?;
                return Ok(Some(RunStatus::Cancelled));
            }
            RunStatus::Paused => {
                info!(run_id = %self.run_id, "Run paused, stopping loop");
                self.queue.cancel_all();
                self.checkpoint_now().await?;
                return Ok(Some(RunStatus::Paused));
            }
            _ => {}
        }

        if run.all_tasks_terminal() {
            info!(run_id = %self.run_id, "All tasks terminal, run complete");
            self.finish(RunStatus::Completed).await?;
            self.broadcaster
                .publish(Event::new(
                    EventType::RunComplete,
                    &self.run_id,
                    serde_json::json!({ "task_counts": run.task_counts() }),
                ))
                .await;
            return Ok(Some(RunStatus::Completed));
        }

        if run.has_waiting_human() && !run.has_actionable_work() && !self.queue.has_work() {
            info!(run_id = %self.run_id, "Waiting on human resolution, interrupting run");
            self.finish(RunStatus::Interrupted).await?;
            self.broadcaster
                .publish(Event::new(
                    EventType::Interrupted,
                    &self.run_id,
                    serde_json::json!({
                        "waiting_tasks": run
                            .tasks
                            .iter()
                            .filter(|t| t.status == TaskStatus::WaitingHuman)
                            .map(|t| t.id.clone())
                            .collect::<Vec<_>>()
                    }),
                ))
                .await;
            return Ok(Some(RunStatus::Interrupted));
        }

        Ok(None)
    }

    /// Persist a terminal run status
    async fn finish(&mut self, status: RunStatus) -> Result<()> {
        self.apply_and_publish(RunPatch::new().with_status(status), vec![]).await
    }

    /// Apply a patch, checkpoint the result, then publish events
    ///
    /// Ordering matters: a subscriber that observes an event must be able
    /// to read a checkpoint that already reflects it.
    async fn apply_and_publish(&mut self, patch: RunPatch, events: Vec<Event>) -> Result<()> {
        self.store.apply(&self.run_id, patch).await?;
        self.checkpoint_now().await?;

        let run = self.store.get_run_required(&self.run_id).await?;
        self.broadcaster
            .publish(Event::state_update(
                &self.run_id,
                serde_json::json!({
                    "status": run.status.to_string(),
                    "task_counts": run.task_counts(),
                }),
            ))
            .await;
        for event in events {
            self.broadcaster.publish(event).await;
        }
        Ok(())
    }

    async fn checkpoint_now(&mut self) -> Result<()> {
        let run = self.store.get_run_required(&self.run_id).await?;
        self.checkpointer.save(&run).context("checkpoint run")
    }
}

/// Run-level context handed to every worker
fn render_briefing(run: &Run) -> String {
    let mut briefing = format!("Run objective: {}\n", run.objective);

    if !run.design_log.is_empty() {
        briefing.push_str("\nDesign notes:\n");
        for note in run.design_log.iter().rev().take(5) {
            briefing.push_str(&format!("- {}: {}\n", note.title, truncate(&note.body, 400)));
        }
    }

    if !run.insights.is_empty() {
        briefing.push_str("\nInsights from other workers:\n");
        for insight in run.insights.iter().rev().take(15) {
            briefing.push_str(&format!("- {}\n", insight.content));
        }
    }

    briefing
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}
