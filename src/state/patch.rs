//! Structured run patches and their reducers
//!
//! Every mutation of a run goes through a [`RunPatch`]: an explicit set of
//! reducer operations, one per field family. This replaces opaque partial
//! objects with operations that can be tested and replayed:
//!
//! - `tasks`: merge by id (incoming replaces existing, new ones append in
//!   order); `delete_tasks` removes.
//! - `insights` / `design_log`: union by id, existing order preserved,
//!   duplicate ids ignored.
//! - `task_memories`: per-task append; `clear_memories` wipes the listed
//!   histories first.
//! - Scalar fields: last-write-wins when present.
//!
//! A patch is atomic: the task reducer output must stay acyclic or the whole
//! patch is rejected with `cycle_detected` and no field is touched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{dag, DesignNote, Insight, Run, RunStatus, Task};
use crate::llm::Message;

use super::messages::StoreError;

/// An explicit, reducer-based partial update of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPatch {
    /// Task records to merge by id (replace existing, append new)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,

    /// Task ids to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_tasks: Vec<String>,

    /// Insights to union by id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<Insight>,

    /// Design notes to union by id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub design_log: Vec<DesignNote>,

    /// Messages to append per task id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub task_memories: HashMap<String, Vec<Message>>,

    /// Task ids whose memories are wiped (applied before appends)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clear_memories: Vec<String>,

    /// Last-write-wins scalars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replan_requested: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Map<String, serde_json::Value>>,
}

impl RunPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn delete_task(mut self, task_id: impl Into<String>) -> Self {
        self.delete_tasks.push(task_id.into());
        self
    }

    pub fn with_insight(mut self, insight: Insight) -> Self {
        self.insights.push(insight);
        self
    }

    pub fn with_design_note(mut self, note: DesignNote) -> Self {
        self.design_log.push(note);
        self
    }

    pub fn append_memory(mut self, task_id: impl Into<String>, messages: Vec<Message>) -> Self {
        self.task_memories.entry(task_id.into()).or_default().extend(messages);
        self
    }

    pub fn clear_memory(mut self, task_id: impl Into<String>) -> Self {
        self.clear_memories.push(task_id.into());
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_replan_requested(mut self, requested: bool) -> Self {
        self.replan_requested = Some(requested);
        self
    }

    /// Whether applying this patch would change nothing
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.delete_tasks.is_empty()
            && self.insights.is_empty()
            && self.design_log.is_empty()
            && self.task_memories.is_empty()
            && self.clear_memories.is_empty()
            && self.status.is_none()
            && self.replan_requested.is_none()
            && self.spec.is_none()
    }

    /// Merge another patch into this one (other's scalars win)
    pub fn merge(mut self, other: RunPatch) -> Self {
        self.tasks.extend(other.tasks);
        self.delete_tasks.extend(other.delete_tasks);
        self.insights.extend(other.insights);
        self.design_log.extend(other.design_log);
        for (task_id, messages) in other.task_memories {
            self.task_memories.entry(task_id).or_default().extend(messages);
        }
        self.clear_memories.extend(other.clear_memories);
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.replan_requested.is_some() {
            self.replan_requested = other.replan_requested;
        }
        if other.spec.is_some() {
            self.spec = other.spec;
        }
        self
    }
}

/// Run the task reducer without committing: deletes, then merge by id
fn reduce_tasks(existing: &[Task], patch: &RunPatch) -> Vec<Task> {
    let mut result: Vec<Task> = existing
        .iter()
        .filter(|t| !patch.delete_tasks.contains(&t.id))
        .cloned()
        .collect();

    for incoming in &patch.tasks {
        if patch.delete_tasks.contains(&incoming.id) {
            continue;
        }
        match result.iter_mut().find(|t| t.id == incoming.id) {
            Some(slot) => *slot = incoming.clone(),
            None => result.push(incoming.clone()),
        }
    }

    result
}

/// Apply a patch to a run
///
/// Returns the task ids whose records changed (for task_update broadcasts).
/// On a cycle the run is untouched and `StoreError::CycleDetected` carries
/// the offending path.
pub fn apply_patch(run: &mut Run, patch: &RunPatch) -> Result<Vec<String>, StoreError> {
    if patch.is_empty() {
        return Ok(Vec::new());
    }

    // Reduce tasks first so the acyclicity gate sees the final graph
    let candidate = reduce_tasks(&run.tasks, patch);
    if let Some(cycle) = dag::find_cycle(&candidate) {
        return Err(StoreError::CycleDetected { cycle });
    }

    let mut changed: Vec<String> = patch.delete_tasks.clone();
    changed.extend(patch.tasks.iter().map(|t| t.id.clone()));
    changed.dedup();

    run.tasks = candidate;

    // Memories: wipe listed histories, then append
    for task_id in &patch.clear_memories {
        run.task_memories.remove(task_id);
    }
    for (task_id, messages) in &patch.task_memories {
        run.task_memories
            .entry(task_id.clone())
            .or_default()
            .extend(messages.iter().cloned());
    }

    // Append-only unions: duplicates by id are ignored
    for insight in &patch.insights {
        if !run.insights.iter().any(|i| i.id == insight.id) {
            run.insights.push(insight.clone());
        }
    }
    for note in &patch.design_log {
        if !run.design_log.iter().any(|n| n.id == note.id) {
            run.design_log.push(note.clone());
        }
    }

    // Scalars: last write wins
    if let Some(status) = patch.status {
        run.status = status;
    }
    if let Some(replan) = patch.replan_requested {
        run.replan_requested = replan;
    }
    if let Some(spec) = &patch.spec {
        run.spec = spec.clone();
    }

    run.touch();
    Ok(changed)
}
