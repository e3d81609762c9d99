//! Tool error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path {path} escapes worktree {worktree}")]
    SandboxViolation { path: PathBuf, worktree: PathBuf },

    #[error("Must read file before writing: {path}")]
    WriteWithoutRead { path: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("Tool not found: {name}")]
    UnknownTool { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("String pattern '{pattern}' not found in file")]
    PatternNotFound { pattern: String },

    #[error("String pattern found {count} times, expected 1 (use all=true to replace every occurrence)")]
    PatternNotUnique { count: usize },
}
