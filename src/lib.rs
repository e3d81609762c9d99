//! Conductor - multi-agent workflow orchestration engine
//!
//! Conductor decomposes a natural-language objective into a DAG of tasks,
//! dispatches them to concurrent LLM worker agents executing tool calls
//! inside isolated git worktrees, gates their output through QA, and
//! merges accepted work into a shared trunk.
//!
//! # Core concepts
//!
//! - **Blackboard state**: one authoritative run record, mutated only
//!   through reducer patches and persisted on every change
//! - **Single-writer discipline**: workers and the strategist propose
//!   `pending_*` states; the director confirms them
//! - **Phoenix retry**: failed tasks restart with a fresh context window
//!   and an incremented retry count, escalating to a human when exhausted
//! - **Serialized trunk**: worktrees write freely in parallel; one mutex
//!   orders everything that touches trunk
//!
//! # Modules
//!
//! - [`domain`] - Run/Task records and DAG algorithms
//! - [`state`] - the TaskStore actor and reducer patches
//! - [`checkpoint`] - durable snapshots over the runstore backends
//! - [`worktree`] - per-task checkouts, rebase, merge, recovery
//! - [`queue`] - the bounded worker job pool
//! - [`broadcast`] - run event fan-out
//! - [`llm`] - the LlmInvoker capability and reference provider
//! - [`tools`] - the sandboxed tool registry
//! - [`worker`] - profile-dispatched agent execution
//! - [`director`] - decomposition, integration, Phoenix, escalation
//! - [`strategist`] - QA verdicts and merge coordination
//! - [`dispatch`] - the per-run controller loop
//! - [`control`] - the create/pause/resume/cancel/resolve surface

pub mod broadcast;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod control;
pub mod director;
pub mod dispatch;
pub mod domain;
pub mod llm;
pub mod queue;
pub mod state;
pub mod strategist;
pub mod tools;
pub mod worker;
pub mod worktree;

// Re-export commonly used types
pub use broadcast::{Broadcaster, Event, EventType};
pub use checkpoint::Checkpointer;
pub use config::Config;
pub use control::{ControlPlane, ControlError, Resolution, ResolveAction};
pub use director::{Director, DirectorReport};
pub use dispatch::DispatchLoop;
pub use domain::{Run, RunStatus, Task, TaskPhase, TaskStatus, WorkerProfile};
pub use llm::{AnthropicInvoker, LlmError, LlmInvoker};
pub use queue::TaskQueue;
pub use state::{RunPatch, StoreError, TaskStore};
pub use strategist::Strategist;
pub use worker::{Worker, WorkerReport};
pub use worktree::{MergeResult, WorktreeConfig, WorktreeError, WorktreeManager};
