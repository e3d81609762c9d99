//! Tool system for worker agents
//!
//! Tools are data (name, schema, description) dispatched to named
//! implementations; profile selection filters the registry. Execution is
//! sandboxed to the task's worktree via [`ToolContext`], which also
//! enforces read-before-write and collects structured side-channel output.

pub mod builtin;
mod context;
mod error;
mod executor;
mod traits;

pub use context::{CommandRecord, CompletionSignal, SideChannel, ToolContext};
pub use error::ToolError;
pub use executor::ToolExecutor;
pub use traits::{Tool, ToolResult};
