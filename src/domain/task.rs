//! Task record and its satellite types
//!
//! A Task is the unit of work scheduled to a worker. Its status moves through
//! the planned/ready/active/awaiting_qa pipeline, with `pending_*` staging
//! states that only the director promotes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Lifecycle phase of a task, which determines worker profile eligibility
/// and QA policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Plan,
    #[default]
    Build,
    Test,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::Build => write!(f, "build"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Role a worker plays, selecting its tool set and prompt policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerProfile {
    Planner,
    #[default]
    Coder,
    Tester,
    Researcher,
    Writer,
    Merger,
    Qa,
}

impl WorkerProfile {
    /// The default profile for a phase
    pub fn for_phase(phase: TaskPhase) -> Self {
        match phase {
            TaskPhase::Plan => Self::Planner,
            TaskPhase::Build => Self::Coder,
            TaskPhase::Test => Self::Tester,
        }
    }
}

impl std::fmt::Display for WorkerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planner => write!(f, "planner"),
            Self::Coder => write!(f, "coder"),
            Self::Tester => write!(f, "tester"),
            Self::Researcher => write!(f, "researcher"),
            Self::Writer => write!(f, "writer"),
            Self::Merger => write!(f, "merger"),
            Self::Qa => write!(f, "qa"),
        }
    }
}

/// Task status in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, dependencies not yet evaluated
    #[default]
    Planned,
    /// All dependencies complete, waiting for a worker slot
    Ready,
    /// Dependencies outstanding
    Blocked,
    /// A worker job is running in an allocated worktree
    Active,
    /// Worker finished, waiting for a QA verdict
    AwaitingQa,
    /// Staged by the worker, promoted to awaiting_qa by the director
    PendingAwaitingQa,
    /// Staged by worker/strategist, promoted to complete by the director
    PendingComplete,
    /// Staged by worker/strategist, promoted to failed by the director
    PendingFailed,
    /// Merged (or QA-skipped) and done
    Complete,
    /// Worker execution failed
    Failed,
    /// QA rejected the output
    FailedQa,
    /// Escalated; progress requires a resolve command
    WaitingHuman,
    /// Dropped via replan or human resolution
    Abandoned,
}

impl TaskStatus {
    /// True for states that will never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Abandoned)
    }

    /// True for the staging states written by worker/strategist
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingAwaitingQa | Self::PendingComplete | Self::PendingFailed)
    }

    /// The final state a staging state promotes to; identity otherwise
    pub fn promoted(&self) -> TaskStatus {
        match self {
            Self::PendingAwaitingQa => Self::AwaitingQa,
            Self::PendingComplete => Self::Complete,
            Self::PendingFailed => Self::Failed,
            other => *other,
        }
    }

    /// True for the failure states the director routes through Phoenix
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::FailedQa)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planned => "planned",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Active => "active",
            Self::AwaitingQa => "awaiting_qa",
            Self::PendingAwaitingQa => "pending_awaiting_qa",
            Self::PendingComplete => "pending_complete",
            Self::PendingFailed => "pending_failed",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::FailedQa => "failed_qa",
            Self::WaitingHuman => "waiting_human",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

/// Who is to blame for a reported test failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureBlame {
    /// Test is correct, the code under test is wrong
    CodeWrong,
    /// Test itself is wrong, the code is right
    TestWrong,
    /// Both need work
    BothWrong,
}

/// QA classification of one reported test failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFailureAnalysis {
    /// Test name or identifier as reported
    pub test: String,
    pub blame: FailureBlame,
    /// Short justification
    pub notes: String,
}

/// Verdict produced by the QA agent
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QaVerdict {
    pub pass: bool,
    /// Feedback for the worker on a failed verdict
    pub feedback: String,
    /// Per-failure blame analysis (test phase only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_analysis: Vec<TestFailureAnalysis>,
    /// Tests judged wrong while the code passed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests_needing_revision: Vec<String>,
    /// Sharper acceptance criteria for the paired test task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refined_test_criteria: Vec<String>,
    /// Forward-compatible extension fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// After-action report a worker produces on completion
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Aar {
    pub summary: String,
    pub approach: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions_made: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent_estimate: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Worker-raised escalation attached to a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    /// Stable escalation kind identifier (e.g. "phoenix_exhausted",
    /// "merge_unresolvable", "worker_blocked")
    pub kind: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// Context carried by a merger task spawned to resolve a trunk conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeContext {
    /// The task whose merge conflicted
    pub original_task_id: String,
    pub conflicting_files: Vec<String>,
    pub error_message: String,
}

/// Structured payload written when a task escalates to waiting_human
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingResolution {
    pub reason: String,
    /// Condensed context from the last attempt (QA feedback, error output)
    pub failure_context: String,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    pub created_at: DateTime<Utc>,
}

/// Terminal status a worker proposes for its own execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Complete,
    Blocked,
    Failed,
    WaitingSubtask,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::WaitingSubtask => "waiting_subtask",
        };
        write!(f, "{}", s)
    }
}

/// A worker-proposed task, pending director approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub component: String,
    pub phase: TaskPhase,
    /// Titles or ids of other tasks this depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Free-text dependency clues for the director to resolve
    #[serde(default)]
    pub dependency_queries: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl SuggestedTask {
    /// Materialize into a planned task
    pub fn into_task(self) -> Task {
        let mut task = Task::new(self.title, self.phase)
            .with_description(self.description)
            .with_component(self.component)
            .with_priority(self.priority)
            .with_criteria(self.acceptance_criteria);
        task.depends_on = self.depends_on;
        task.dependency_queries = self.dependency_queries;
        task
    }
}


/// Unit of work scheduled to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique within a run
    pub id: String,

    pub title: String,

    pub description: String,

    /// Free-form component tag grouping related tasks
    #[serde(default)]
    pub component: String,

    pub phase: TaskPhase,

    pub status: TaskStatus,

    /// Task IDs that must be complete before this can start
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Free-text dependency clues the director resolves into depends_on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependency_queries: Vec<String>,

    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    pub assigned_worker_profile: WorkerProfile,

    /// Higher dispatches first
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub retry_count: u32,

    /// Phoenix retries allowed before escalation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Relative path of the produced artifact, once any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_verdict: Option<QaVerdict>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aar: Option<Aar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,

    /// Opaque worker resume hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<serde_json::Value>,

    /// Subtask IDs this task is suspended on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waiting_for_tasks: Vec<String>,

    /// Worker-proposed tasks held here until plan integration consumes them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_tasks: Vec<SuggestedTask>,

    /// Populated when the task escalates to waiting_human
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_resolution: Option<PendingResolution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Merger tasks only: conflict context from the failed merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_context: Option<MergeContext>,

    /// Merger tasks only: operate in this task's worktree instead of a
    /// fresh one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_worktree_task_id: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    /// Create a new task with a generated ID
    pub fn new(title: impl Into<String>, phase: TaskPhase) -> Self {
        let title = title.into();
        Self {
            id: generate_id("task", &title),
            title,
            description: String::new(),
            component: String::new(),
            phase,
            status: TaskStatus::Planned,
            depends_on: Vec::new(),
            dependency_queries: Vec::new(),
            acceptance_criteria: Vec::new(),
            assigned_worker_profile: WorkerProfile::for_phase(phase),
            priority: 0,
            retry_count: 0,
            max_retries: default_max_retries(),
            result_path: None,
            qa_verdict: None,
            aar: None,
            escalation: None,
            checkpoint: None,
            waiting_for_tasks: Vec::new(),
            suggested_tasks: Vec::new(),
            pending_resolution: None,
            branch_name: None,
            worktree_path: None,
            started_at: None,
            completed_at: None,
            merge_context: None,
            use_worktree_task_id: None,
        }
    }

    /// Create a task with a specific ID (for testing or recovery)
    pub fn with_id(id: impl Into<String>, title: impl Into<String>, phase: TaskPhase) -> Self {
        let mut task = Self::new(title, phase);
        task.id = id.into();
        task
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_profile(mut self, profile: WorkerProfile) -> Self {
        self.assigned_worker_profile = profile;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dep_id: impl Into<String>) -> Self {
        self.depends_on.push(dep_id.into());
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    /// Whether Phoenix may retry this task one more time
    ///
    /// A task gets `max_retries + 1` total attempts; exceeding that always
    /// escalates to waiting_human, whatever `max_retries` is configured to.
    pub fn can_phoenix(&self) -> bool {
        self.retry_count <= self.max_retries
    }

    /// Whether this is a merger task spawned by the strategist
    pub fn is_merger(&self) -> bool {
        self.merge_context.is_some()
    }

    /// Branch name for the current attempt
    pub fn attempt_branch(&self) -> String {
        if self.retry_count == 0 {
            format!("task/{}", self.id)
        } else {
            format!("task/{}/retry-{}", self.id, self.retry_count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new("Write parser", TaskPhase::Build);
        assert!(task.id.contains("-task-"));
        assert_eq!(task.status, TaskStatus::Planned);
        assert_eq!(task.assigned_worker_profile, WorkerProfile::Coder);
        assert_eq!(task.max_retries, 3);
        assert!(task.depends_on.is_empty());
    }

    #[test]
    fn test_profile_for_phase() {
        assert_eq!(WorkerProfile::for_phase(TaskPhase::Plan), WorkerProfile::Planner);
        assert_eq!(WorkerProfile::for_phase(TaskPhase::Build), WorkerProfile::Coder);
        assert_eq!(WorkerProfile::for_phase(TaskPhase::Test), WorkerProfile::Tester);
    }

    #[test]
    fn test_status_promotion() {
        assert_eq!(TaskStatus::PendingAwaitingQa.promoted(), TaskStatus::AwaitingQa);
        assert_eq!(TaskStatus::PendingComplete.promoted(), TaskStatus::Complete);
        assert_eq!(TaskStatus::PendingFailed.promoted(), TaskStatus::Failed);
        assert_eq!(TaskStatus::Ready.promoted(), TaskStatus::Ready);
    }

    #[test]
    fn test_status_predicates() {
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Abandoned.is_terminal());
        assert!(!TaskStatus::WaitingHuman.is_terminal());
        assert!(TaskStatus::PendingFailed.is_pending());
        assert!(!TaskStatus::Failed.is_pending());
        assert!(TaskStatus::Failed.is_failed());
        assert!(TaskStatus::FailedQa.is_failed());
        assert!(!TaskStatus::Complete.is_failed());
    }

    #[test]
    fn test_can_phoenix() {
        // Default max_retries=3: attempts 1..=4 retry, the 5th escalates
        let mut task = Task::new("t", TaskPhase::Build);
        assert!(task.can_phoenix());
        task.retry_count = 3;
        assert!(task.can_phoenix());
        task.retry_count = 4;
        assert!(!task.can_phoenix());

        // A lowered max_retries tightens the bound
        let mut short = Task::new("t", TaskPhase::Build);
        short.max_retries = 1;
        short.retry_count = 2;
        assert!(!short.can_phoenix());

        // A raised max_retries widens it; there is no hidden ceiling
        let mut long = Task::new("t", TaskPhase::Build);
        long.max_retries = 10;
        long.retry_count = 10;
        assert!(long.can_phoenix());
        long.retry_count = 11;
        assert!(!long.can_phoenix());
    }

    #[test]
    fn test_attempt_branch() {
        let mut task = Task::with_id("t-1", "t", TaskPhase::Build);
        assert_eq!(task.attempt_branch(), "task/t-1");
        task.retry_count = 2;
        assert_eq!(task.attempt_branch(), "task/t-1/retry-2");
    }

    #[test]
    fn test_task_serde_round_trip() {
        let mut task = Task::new("Round trip", TaskPhase::Test)
            .with_description("desc")
            .with_dependency("dep-1")
            .with_criteria(vec!["report exists".to_string()]);
        task.qa_verdict = Some(QaVerdict {
            pass: false,
            feedback: "missing edge case".to_string(),
            ..Default::default()
        });
        task.merge_context = Some(MergeContext {
            original_task_id: "orig".to_string(),
            conflicting_files: vec!["src/lib.rs".to_string()],
            error_message: "conflict".to_string(),
        });

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.depends_on, task.depends_on);
        assert_eq!(back.qa_verdict.as_ref().unwrap().feedback, "missing edge case");
        assert!(back.is_merger());
    }

    #[test]
    fn test_status_serde_names() {
        let s = serde_json::to_string(&TaskStatus::PendingAwaitingQa).unwrap();
        assert_eq!(s, "\"pending_awaiting_qa\"");
        let s = serde_json::to_string(&TaskStatus::FailedQa).unwrap();
        assert_eq!(s, "\"failed_qa\"");
    }

    #[test]
    fn test_qa_verdict_extension_fields_survive() {
        let json = r#"{"pass":true,"feedback":"","confidence":0.9}"#;
        let verdict: QaVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(verdict.extra.get("confidence").unwrap().as_f64(), Some(0.9));
        let back = serde_json::to_string(&verdict).unwrap();
        assert!(back.contains("confidence"));
    }
}
