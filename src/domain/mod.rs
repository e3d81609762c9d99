//! Domain types for Conductor
//!
//! Core records: Run (the top-level unit of work) and Task (the unit
//! scheduled to a worker), plus the pure dependency-graph algorithms the
//! director and store share.

pub mod dag;
mod id;
mod run;
mod task;

pub use id::{generate_id, slugify};
pub use run::{DesignNote, Insight, Run, RunStatus};
pub use task::{
    Aar, Escalation, FailureBlame, MergeContext, PendingResolution, QaVerdict, SuggestedTask, Task, TaskPhase,
    TaskStatus, TestFailureAnalysis, WorkerProfile, WorkerStatus,
};
