//! Worker result shape

use serde::{Deserialize, Serialize};

use crate::domain::{Aar, Escalation, QaVerdict, SuggestedTask, TaskStatus, WorkerStatus};
use crate::llm::Message;

/// Everything a worker execution hands back to the dispatch loop
///
/// The worker never touches the store; the loop converts this report into
/// reducer patches.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerReport {
    pub status: WorkerStatus,

    /// Relative artifact path, when one was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,

    pub aar: Aar,

    /// Freely posted insights, merged into the run by id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,

    /// Proposed tasks pending director approval
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_tasks: Vec<SuggestedTask>,

    /// Conversation to append to task_memories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,

    /// Opaque resume hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<serde_json::Value>,

    /// QA profile only: the submitted verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_verdict: Option<QaVerdict>,

    /// Commit created on the task branch, when changes existed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl WorkerReport {
    /// The staging status this report proposes for the task
    ///
    /// Workers propose; the director confirms. A worker that finished
    /// waiting on subtasks goes back to planned so readiness re-evaluates
    /// once the subtasks exist.
    pub fn proposed_status(&self) -> TaskStatus {
        match self.status {
            WorkerStatus::Complete => TaskStatus::PendingAwaitingQa,
            WorkerStatus::Failed | WorkerStatus::Blocked => TaskStatus::PendingFailed,
            WorkerStatus::WaitingSubtask => TaskStatus::Planned,
        }
    }
}
