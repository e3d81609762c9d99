//! Director core - the per-cycle control pass
//!
//! Invoked once per dispatch iteration. Phases, in order: pending-state
//! promotion, initial decomposition, Phoenix handling, readiness
//! evaluation, plan integration, HITL gating. The director is the only
//! component that confirms state transitions; workers and the strategist
//! merely propose `pending_*` states.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::DirectorConfig;
use crate::domain::{
    DesignNote, PendingResolution, Run, Task, TaskPhase, TaskStatus, WorkerProfile,
};
use crate::llm::LlmInvoker;
use crate::state::RunPatch;

use super::decompose::decompose;
use super::integrate::integrate;

/// Outcome of one director pass
#[derive(Debug, Default)]
pub struct DirectorReport {
    /// The accumulated state changes to apply
    pub patch: RunPatch,
    /// Tasks that reached waiting_human this pass
    pub human_needed: Vec<String>,
    /// Whether initial decomposition ran
    pub decomposed: bool,
    /// Whether plan integration ran
    pub integrated: bool,
}

/// Task decomposition, plan integration, readiness promotion, Phoenix
/// retry, and escalation gating
pub struct Director {
    invoker: Arc<dyn LlmInvoker>,
    config: DirectorConfig,
}

impl Director {
    pub fn new(invoker: Arc<dyn LlmInvoker>, config: DirectorConfig) -> Self {
        Self { invoker, config }
    }

    /// Run one director pass over a run snapshot
    pub async fn tick(&self, run: &Run) -> Result<DirectorReport> {
        debug!(run_id = %run.run_id, "Director::tick: called");

        let mut local = run.clone();
        let mut report = DirectorReport::default();
        let mut notes: Vec<DesignNote> = Vec::new();

        // Phase 1: promote staging states. A pending failure carrying a
        // failing QA verdict promotes to failed_qa, not failed.
        for task in local.tasks.iter_mut() {
            if task.status.is_pending() {
                let promoted = if task.status == TaskStatus::PendingFailed
                    && task.qa_verdict.as_ref().is_some_and(|v| !v.pass)
                {
                    TaskStatus::FailedQa
                } else {
                    task.status.promoted()
                };
                debug!(task_id = %task.id, from = %task.status, to = %promoted, "Director::tick: promoting");
                task.status = promoted;
                if promoted == TaskStatus::Complete {
                    task.completed_at = Some(Utc::now());
                }
            }
        }

        // Phase 2: initial decomposition, first invocation only
        if local.tasks.is_empty() {
            let (document, planner_tasks, note) = decompose(
                &self.invoker,
                &local.objective,
                &local.spec,
                self.config.max_planner_tasks,
            )
            .await?;

            write_design_doc(&local, &document).await;
            notes.push(note);
            local.tasks.extend(planner_tasks);
            report.decomposed = true;
            info!(run_id = %run.run_id, "Director produced initial decomposition");
        }

        // Phase 3: Phoenix handling for terminal failures
        let failed_ids: Vec<String> = local
            .tasks
            .iter()
            .filter(|t| t.status.is_failed())
            .map(|t| t.id.clone())
            .collect();

        for task_id in failed_ids {
            let task = local.task(&task_id).cloned().expect("failed task present");

            // A failed merger has nothing to gain from a fresh context;
            // conflicts it could not resolve need a human
            if task.is_merger() || !task.can_phoenix() {
                let reason = if task.is_merger() {
                    "merge conflict resolution failed"
                } else {
                    "phoenix retries exhausted"
                };
                escalate(&mut local, &task_id, reason);
                report.human_needed.push(task_id.clone());
                warn!(%task_id, reason, "Task escalated to waiting_human");
                continue;
            }

            // Phoenix: wipe memories, re-plan the task with a higher count
            let fix_feedback = phoenix_fix_feedback(&task);
            {
                let slot = local.task_mut(&task_id).expect("failed task present");
                slot.retry_count += 1;
                slot.status = TaskStatus::Planned;
                slot.worktree_path = None;
                slot.branch_name = None;
                slot.started_at = None;
                // A stale verdict must not misclassify the next failure
                slot.qa_verdict = None;
            }
            report.patch = std::mem::take(&mut report.patch).clear_memory(&task_id);
            info!(%task_id, "Phoenix retry scheduled");

            // A failed test additionally spawns a build task to fix the
            // code; the test re-runs after the fix lands
            if task.phase == TaskPhase::Test {
                if let Some(feedback) = fix_feedback {
                    let fix = Task::new(format!("Fix: {}", task.title), TaskPhase::Build)
                        .with_description(format!(
                            "Address the failures reported by '{}'.\n\nFeedback:\n{}",
                            task.title, feedback
                        ))
                        .with_component(task.component.clone())
                        .with_profile(WorkerProfile::Coder)
                        .with_priority(task.priority + 1);
                    let fix_id = fix.id.clone();
                    local.tasks.push(fix);
                    local
                        .task_mut(&task_id)
                        .expect("failed task present")
                        .depends_on
                        .push(fix_id.clone());
                    info!(%task_id, %fix_id, "Spawned fix build task for failed test");
                }
            }
        }

        // Phase 4: readiness evaluation
        for index in 0..local.tasks.len() {
            let status = local.tasks[index].status;
            if !matches!(status, TaskStatus::Planned | TaskStatus::Blocked) {
                continue;
            }
            let satisfied = deps_satisfied(&local, &local.tasks[index]);
            let task = &mut local.tasks[index];
            let next = if satisfied { TaskStatus::Ready } else { TaskStatus::Blocked };
            if task.status != next {
                debug!(task_id = %task.id, from = %task.status, to = %next, "Director::tick: readiness");
                task.status = next;
            }
        }

        // Phase 5: plan integration once the planner wave has finished
        let has_proposals = local.tasks.iter().any(|t| !t.suggested_tasks.is_empty());
        let wave_done = !local.tasks.iter().any(|t| {
            t.assigned_worker_profile == WorkerProfile::Planner
                && !t.status.is_terminal()
                && t.status != TaskStatus::WaitingHuman
        });

        if (has_proposals && wave_done) || local.replan_requested {
            let changes = integrate(&self.invoker, &self.config, &local)
                .await
                .context("plan integration failed")?;
            for changed in changes.tasks {
                match local.tasks.iter_mut().find(|t| t.id == changed.id) {
                    Some(slot) => *slot = changed,
                    None => local.tasks.push(changed),
                }
            }
            notes.extend(changes.notes);
            if local.replan_requested {
                report.patch = std::mem::take(&mut report.patch).with_replan_requested(false);
                local.replan_requested = false;
            }
            report.integrated = true;
        }

        // Phase 6: HITL gating data is in the report; the dispatch loop
        // broadcasts and suspends

        // Emit changed task records
        let mut changed_ids: BTreeSet<String> = BTreeSet::new();
        for task in &local.tasks {
            match run.task(&task.id) {
                Some(before) => {
                    let before_json = serde_json::to_value(before).unwrap_or_default();
                    let after_json = serde_json::to_value(task).unwrap_or_default();
                    if before_json != after_json {
                        changed_ids.insert(task.id.clone());
                    }
                }
                None => {
                    changed_ids.insert(task.id.clone());
                }
            }
        }

        let mut patch = std::mem::take(&mut report.patch);
        for task_id in &changed_ids {
            if let Some(task) = local.task(task_id) {
                patch = patch.with_task(task.clone());
            }
        }
        for note in notes {
            patch = patch.with_design_note(note);
        }
        report.patch = patch;

        debug!(
            changed = changed_ids.len(),
            human_needed = report.human_needed.len(),
            "Director::tick: complete"
        );
        Ok(report)
    }
}

/// All dependencies complete; abandoned dependencies count as settled
/// because a human explicitly dropped them
fn deps_satisfied(run: &Run, task: &Task) -> bool {
    task.depends_on.iter().all(|dep_id| {
        run.task(dep_id)
            .map(|d| matches!(d.status, TaskStatus::Complete | TaskStatus::Abandoned))
            .unwrap_or(false)
    })
}

/// Feedback text a fix-build task should reference
fn phoenix_fix_feedback(task: &Task) -> Option<String> {
    if task.status == TaskStatus::FailedQa {
        return task.qa_verdict.as_ref().map(|v| v.feedback.clone());
    }
    // A worker-level failure with a verdict attached still carries signal
    task.qa_verdict.as_ref().map(|v| v.feedback.clone())
}

/// Move a task to waiting_human with a structured resolution payload
fn escalate(run: &mut Run, task_id: &str, reason: &str) {
    let Some(task) = run.task_mut(task_id) else {
        return;
    };

    let failure_context = task
        .qa_verdict
        .as_ref()
        .map(|v| v.feedback.clone())
        .filter(|f| !f.is_empty())
        .or_else(|| task.aar.as_ref().map(|a| a.summary.clone()))
        .unwrap_or_else(|| "no failure context captured".to_string());

    task.pending_resolution = Some(PendingResolution {
        reason: reason.to_string(),
        failure_context,
        retry_count: task.retry_count,
        escalation: task.escalation.clone(),
        created_at: Utc::now(),
    });
    task.status = TaskStatus::WaitingHuman;
}

/// Write the design document into the trunk checkout
async fn write_design_doc(run: &Run, document: &str) {
    let path = run.workspace.join("DESIGN_DOC.md");
    if let Err(e) = tokio::fs::write(&path, document).await {
        warn!(error = %e, path = %path.display(), "Failed to write design document");
    }
}
