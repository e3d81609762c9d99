//! write tool - create, replace, or append to a file

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolError, ToolResult};

/// What a write did, for the result message
enum WriteMode {
    Created,
    Replaced,
    Appended,
}

/// Write file contents inside the worktree
///
/// A file that already exists must have been read this attempt before it
/// can be replaced or appended to; agents look before they overwrite.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write"
    }

    fn description(&self) -> &'static str {
        "Create or replace a file, or append to it with append=true. \
         Existing files must be read first. Parent directories are created."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to worktree"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append instead of replacing (default: false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = match input["path"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("path is required"),
        };
        let content = match input["content"].as_str() {
            Some(c) => c,
            None => return ToolResult::error("content is required"),
        };
        let append = input["append"].as_bool().unwrap_or(false);

        match write_checked(ctx, path, content, append).await {
            Ok(mode) => {
                let message = match mode {
                    WriteMode::Created => format!("created {} ({} bytes)", path, content.len()),
                    WriteMode::Replaced => format!("replaced {} ({} bytes)", path, content.len()),
                    WriteMode::Appended => format!("appended {} bytes to {}", content.len(), path),
                };
                debug!(task_id = %ctx.task_id, %path, "WriteFileTool::execute: {}", message);
                ToolResult::success(message)
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// Validate, enforce read-before-write, and perform the write
async fn write_checked(ctx: &ToolContext, path: &str, content: &str, append: bool) -> Result<WriteMode, ToolError> {
    let target = ctx.validate_write_path(Path::new(path))?;
    let existed = target.exists();

    // Both replace and append destroy information the agent may not have
    // seen; an unread existing file is off limits either way
    if existed && !ctx.was_read(&target).await {
        return Err(ToolError::WriteWithoutRead {
            path: path.to_string(),
        });
    }

    if let Some(parent) = target.parent() {
        if !parent.exists() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mode = if append && existed {
        let mut existing = tokio::fs::read_to_string(&target).await?;
        existing.push_str(content);
        tokio::fs::write(&target, existing).await?;
        WriteMode::Appended
    } else {
        tokio::fs::write(&target, content).await?;
        if existed { WriteMode::Replaced } else { WriteMode::Created }
    };

    // A fresh write counts as having read the result
    ctx.track_read(&target).await;
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ctx(temp: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(temp.path().to_path_buf(), "t-1".to_string())
    }

    #[tokio::test]
    async fn test_create_reports_created() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "fresh.txt", "content": "hello"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(result.content.starts_with("created fresh.txt"));
        assert_eq!(fs::read_to_string(temp.path().join("fresh.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_nested_parents_created() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "a/b/c.txt", "content": "deep"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert_eq!(fs::read_to_string(temp.path().join("a/b/c.txt")).unwrap(), "deep");
    }

    #[tokio::test]
    async fn test_unread_existing_file_is_off_limits() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("seen.txt"), "original").unwrap();
        let ctx = ctx(&temp);

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "seen.txt", "content": "clobber"}), &ctx)
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("before writing"));
        assert_eq!(fs::read_to_string(temp.path().join("seen.txt")).unwrap(), "original");
    }

    #[tokio::test]
    async fn test_replace_after_read() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("seen.txt");
        fs::write(&target, "original").unwrap();
        let ctx = ctx(&temp);
        ctx.track_read(&target).await;

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "seen.txt", "content": "updated"}), &ctx)
            .await;

        assert!(result.content.starts_with("replaced seen.txt"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "updated");
    }

    #[tokio::test]
    async fn test_append_mode() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("log.txt");
        fs::write(&target, "line1\n").unwrap();
        let ctx = ctx(&temp);
        ctx.track_read(&target).await;

        let result = WriteFileTool
            .execute(
                serde_json::json!({"path": "log.txt", "content": "line2\n", "append": true}),
                &ctx,
            )
            .await;

        assert!(result.content.starts_with("appended"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "line1\nline2\n");
    }

    #[tokio::test]
    async fn test_append_to_missing_file_creates_it() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let result = WriteFileTool
            .execute(
                serde_json::json!({"path": "new.log", "content": "first\n", "append": true}),
                &ctx,
            )
            .await;

        assert!(result.content.starts_with("created"));
        assert_eq!(fs::read_to_string(temp.path().join("new.log")).unwrap(), "first\n");
    }

    #[tokio::test]
    async fn test_append_unread_rejected_too() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("log.txt"), "line1\n").unwrap();
        let ctx = ctx(&temp);

        let result = WriteFileTool
            .execute(
                serde_json::json!({"path": "log.txt", "content": "line2\n", "append": true}),
                &ctx,
            )
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_escape_attempt_rejected() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "/etc/shadow", "content": "x"}), &ctx)
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_missing_params_rejected() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        assert!(WriteFileTool.execute(serde_json::json!({"path": "x"}), &ctx).await.is_error);
        assert!(WriteFileTool.execute(serde_json::json!({"content": "x"}), &ctx).await.is_error);
    }
}
