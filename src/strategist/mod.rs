//! Strategist - QA verdicts and merge coordination
//!
//! Reviews every task in awaiting_qa. Plan-phase tasks auto-pass. Build
//! and test tasks get a read-only QA agent verdict; a pass leads to
//! rebase-then-merge onto trunk, with conflicts delegated to a spawned
//! merger task that operates in the conflicted worktree. Tests are never
//! treated as authoritative: the QA agent classifies each reported failure
//! as blaming the code, the test, or both.

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::QaConfig;
use crate::domain::{
    MergeContext, QaVerdict, Run, Task, TaskPhase, TaskStatus, WorkerProfile,
};
use crate::llm::LlmInvoker;
use crate::queue::CancelToken;
use crate::state::RunPatch;
use crate::tools::ToolContext;
use crate::worker::Worker;
use crate::worktree::{MergeResult, WorktreeManager};

/// Outcome of reviewing one awaiting_qa task
#[derive(Debug, Default)]
pub struct StrategistOutcome {
    pub patch: RunPatch,
    /// Id of a merger task spawned this review, if any
    pub spawned_merger: Option<String>,
    /// Whether the task's branch landed on trunk
    pub merged: bool,
}

/// QA verdict production and merge coordination
pub struct Strategist {
    invoker: Arc<dyn LlmInvoker>,
    config: QaConfig,
    qa_max_turns: u32,
}

impl Strategist {
    pub fn new(invoker: Arc<dyn LlmInvoker>, config: QaConfig) -> Self {
        Self {
            invoker,
            config,
            qa_max_turns: 20,
        }
    }

    /// Review one task currently in awaiting_qa
    pub async fn review(&self, run: &Run, task_id: &str, worktrees: &WorktreeManager) -> Result<StrategistOutcome> {
        debug!(%task_id, "Strategist::review: called");
        let task = run
            .task(task_id)
            .ok_or_else(|| eyre::eyre!("task {} not found", task_id))?;

        // Plan phase: auto-pass, no merge; the worktree has served its
        // purpose
        if task.phase == TaskPhase::Plan && self.config.auto_pass_plan {
            debug!(%task_id, "Strategist::review: plan phase auto-pass");
            let branch = task.branch_name.clone().unwrap_or_else(|| task.attempt_branch());
            let _ = worktrees.cleanup_worktree(&task.id, &branch, false).await;

            let mut passed = task.clone();
            passed.status = TaskStatus::PendingComplete;
            return Ok(StrategistOutcome {
                patch: RunPatch::new().with_task(passed),
                ..Default::default()
            });
        }

        // A merger's work is validated by re-merging its original, not by
        // its own QA pass; completing it unblocks that re-merge
        if task.is_merger() {
            debug!(%task_id, "Strategist::review: merger auto-complete");
            let mut done = task.clone();
            done.status = TaskStatus::PendingComplete;
            return Ok(StrategistOutcome {
                patch: RunPatch::new().with_task(done),
                ..Default::default()
            });
        }

        // A merger may already be working this task's conflict
        let merger_children: Vec<&Task> = run
            .tasks
            .iter()
            .filter(|t| {
                t.merge_context
                    .as_ref()
                    .is_some_and(|c| c.original_task_id == task.id)
            })
            .collect();
        if merger_children.iter().any(|m| !m.status.is_terminal()) {
            debug!(%task_id, "Strategist::review: merger still in flight, waiting");
            return Ok(StrategistOutcome::default());
        }

        // Reuse a passing verdict from before a merge conflict; otherwise
        // ask the QA agent
        let verdict = match task.qa_verdict.as_ref().filter(|v| v.pass) {
            Some(v) => v.clone(),
            None => self.run_qa_agent(run, task).await?,
        };

        if !verdict.pass {
            info!(%task_id, "QA verdict: FAIL");
            let mut failed = task.clone();
            failed.qa_verdict = Some(verdict);
            failed.status = TaskStatus::PendingFailed;
            return Ok(StrategistOutcome {
                patch: RunPatch::new().with_task(failed),
                ..Default::default()
            });
        }

        info!(%task_id, "QA verdict: PASS, attempting merge");
        self.merge_accepted(run, task, verdict, worktrees).await
    }

    /// Rebase-then-merge an accepted task; conflicts spawn a merger
    async fn merge_accepted(
        &self,
        run: &Run,
        task: &Task,
        verdict: QaVerdict,
        worktrees: &WorktreeManager,
    ) -> Result<StrategistOutcome> {
        let branch = task
            .branch_name
            .clone()
            .unwrap_or_else(|| task.attempt_branch());

        let rebase = worktrees
            .rebase_on_trunk(&task.id)
            .await
            .context("rebase before merge")?;

        let merge = match rebase {
            MergeResult::Success { .. } => worktrees
                .merge_to_trunk(&task.id, &branch, &task.title)
                .await
                .context("merge to trunk")?,
            other => other,
        };

        match merge {
            MergeResult::Success { commit } => {
                debug!(task_id = %task.id, ?commit, "Strategist::merge_accepted: merged");
                let _ = worktrees.cleanup_worktree(&task.id, &branch, false).await;

                let mut done = task.clone();
                done.qa_verdict = Some(verdict.clone());
                done.status = TaskStatus::PendingComplete;

                let mut patch = RunPatch::new().with_task(done);
                patch = apply_refined_criteria(patch, run, task, &verdict);

                Ok(StrategistOutcome {
                    patch,
                    merged: true,
                    ..Default::default()
                })
            }
            MergeResult::Conflict {
                conflicting_files,
                message,
            } => {
                warn!(task_id = %task.id, files = conflicting_files.len(), "Merge conflict, spawning merger");

                // The original holds its passing verdict and stays in QA
                // until the merger resolves the worktree
                let mut original = task.clone();
                original.qa_verdict = Some(verdict);
                original.status = TaskStatus::AwaitingQa;

                let mut merger = Task::new(format!("Merge: {}", task.title), TaskPhase::Build)
                    .with_description(format!(
                        "Resolve the rebase conflicts blocking '{}' from landing on trunk. \
                         Reconcile both sides of every conflicted file, then stage and \
                         continue the rebase.",
                        task.title
                    ))
                    .with_component(task.component.clone())
                    .with_profile(WorkerProfile::Merger)
                    .with_priority(task.priority + 1)
                    .with_dependency(task.id.clone());
                // Dispatchable immediately; readiness gating would deadlock
                // on the original, which is parked in awaiting_qa
                merger.status = TaskStatus::Ready;
                merger.use_worktree_task_id = Some(task.id.clone());
                merger.merge_context = Some(MergeContext {
                    original_task_id: task.id.clone(),
                    conflicting_files,
                    error_message: message,
                });
                let merger_id = merger.id.clone();

                Ok(StrategistOutcome {
                    patch: RunPatch::new().with_task(original).with_task(merger),
                    spawned_merger: Some(merger_id),
                    merged: false,
                })
            }
            MergeResult::Failed { message } => {
                warn!(task_id = %task.id, %message, "Merge failed (non-conflict)");
                // Branch kept for forensics
                let _ = worktrees.cleanup_worktree(&task.id, &branch, true).await;

                let mut failed = task.clone();
                failed.qa_verdict = Some(verdict);
                failed.status = TaskStatus::PendingFailed;
                failed.escalation = Some(crate::domain::Escalation {
                    kind: "merge_failure".to_string(),
                    reason: message,
                    suggested_action: None,
                });

                Ok(StrategistOutcome {
                    patch: RunPatch::new().with_task(failed),
                    ..Default::default()
                })
            }
        }
    }

    /// Run the read-only QA agent over the task's worktree
    async fn run_qa_agent(&self, run: &Run, task: &Task) -> Result<QaVerdict> {
        debug!(task_id = %task.id, "Strategist::run_qa_agent: called");

        let worktree = task
            .worktree_path
            .clone()
            .ok_or_else(|| eyre::eyre!("task {} has no worktree to review", task.id))?;

        let mut qa_task = Task::new(format!("QA: {}", task.title), task.phase)
            .with_description(task.description.clone())
            .with_criteria(task.acceptance_criteria.clone());
        qa_task.assigned_worker_profile = WorkerProfile::Qa;

        let ctx = ToolContext::new(worktree, task.id.clone()).with_shared_root(run.workspace.clone());

        let briefing = format!(
            "You are reviewing the completed task '{}'.\n\nWorker summary:\n{}\n\n\
             Acceptance criteria:\n{}\n",
            task.title,
            task.aar.as_ref().map(|a| a.summary.clone()).unwrap_or_default(),
            task.acceptance_criteria.join("\n- "),
        );

        let worker = Worker::new(self.invoker.clone(), self.qa_max_turns);
        let report = worker
            .execute(&qa_task, &ctx, &briefing, &CancelToken::noop())
            .await
            .context("QA agent execution failed")?;

        report
            .qa_verdict
            .ok_or_else(|| eyre::eyre!("QA agent finished without a verdict"))
    }
}

/// Augment the paired test tasks' acceptance criteria with the verdict's
/// refinements; originals are never removed
fn apply_refined_criteria(mut patch: RunPatch, run: &Run, task: &Task, verdict: &QaVerdict) -> RunPatch {
    if task.phase != TaskPhase::Build || verdict.refined_test_criteria.is_empty() {
        return patch;
    }

    for candidate in &run.tasks {
        if candidate.phase != TaskPhase::Test || !candidate.depends_on.contains(&task.id) {
            continue;
        }
        let mut updated = candidate.clone();
        let mut added = false;
        for criterion in &verdict.refined_test_criteria {
            if !updated.acceptance_criteria.contains(criterion) {
                updated.acceptance_criteria.push(criterion.clone());
                added = true;
            }
        }
        if added {
            debug!(test_task = %updated.id, "apply_refined_criteria: criteria augmented");
            patch = patch.with_task(updated);
        }
    }

    patch
}
