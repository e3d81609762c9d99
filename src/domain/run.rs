//! Run record: the top-level unit of work
//!
//! A Run owns the task DAG, the append-only design log and insight lists,
//! and the per-task agent message histories. Process-local handles (worktree
//! manager, configuration) are injected services keyed by run_id and never
//! appear here, so the serialized form is exactly the checkpointed form.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Message;

use super::id::generate_id;
use super::task::{Task, TaskStatus};

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    /// Exited because a task needs a human decision
    Interrupted,
    Cancelled,
    Completed,
    Failed,
    /// No forward progress was possible
    Deadlock,
    Paused,
}

impl RunStatus {
    /// True when the dispatch loop has exited and will not restart on its own
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deadlock => "deadlock",
            Self::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

/// Append-only design decision record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignNote {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl DesignNote {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: generate_id("note", &title),
            title,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only worker-posted insight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    /// Task that posted it, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn new(task_id: Option<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: generate_id("insight", &content),
            task_id,
            content,
            created_at: Utc::now(),
        }
    }
}

/// The top-level unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,

    /// Checkpoint key, distinct from run_id so a run can be re-threaded
    pub thread_id: String,

    /// The natural-language objective
    pub objective: String,

    /// Open structured specification supplied at creation
    #[serde(default)]
    pub spec: serde_json::Map<String, serde_json::Value>,

    /// Ordered, unique by id
    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(default)]
    pub design_log: Vec<DesignNote>,

    #[serde(default)]
    pub insights: Vec<Insight>,

    /// task_id -> ordered agent message history
    #[serde(default)]
    pub task_memories: HashMap<String, Vec<Message>>,

    pub status: RunStatus,

    /// Set by the control plane; the director re-runs plan integration
    #[serde(default)]
    pub replan_requested: bool,

    /// Trunk checkout for this run
    pub workspace: PathBuf,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a new run for an objective
    pub fn new(objective: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        let objective = objective.into();
        let run_id = generate_id("run", &objective);
        let now = Utc::now();
        Self {
            thread_id: run_id.clone(),
            run_id,
            objective,
            spec: serde_json::Map::new(),
            tasks: Vec::new(),
            design_log: Vec::new(),
            insights: Vec::new(),
            task_memories: HashMap::new(),
            status: RunStatus::Running,
            replan_requested: false,
            workspace: workspace.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a task by id
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Look up a task mutably by id
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// All tasks currently in the given status
    pub fn tasks_in(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.status == status).collect()
    }

    /// Every task is complete or abandoned
    pub fn all_tasks_terminal(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// At least one task is waiting on a human
    pub fn has_waiting_human(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::WaitingHuman)
    }

    /// Any task in a state the loop can still act on
    pub fn has_actionable_work(&self) -> bool {
        self.tasks.iter().any(|t| {
            matches!(
                t.status,
                TaskStatus::Planned
                    | TaskStatus::Ready
                    | TaskStatus::Blocked
                    | TaskStatus::Active
                    | TaskStatus::AwaitingQa
            ) || t.status.is_pending()
                || t.status.is_failed()
        })
    }

    /// Task counts keyed by status display name, for run summaries
    pub fn task_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for task in &self.tasks {
            *counts.entry(task.status.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Tasks whose depends_on includes the given id
    pub fn dependents_of(&self, task_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.depends_on.iter().any(|d| d == task_id))
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
