//! file_exists tool - existence probe before writes

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Check whether a path exists (coder contract: probe before writing)
pub struct FileExistsTool;

#[async_trait]
impl Tool for FileExistsTool {
    fn name(&self) -> &'static str {
        "file_exists"
    }

    fn description(&self) -> &'static str {
        "Check whether a file or directory exists. Use before writing to a path you have not read."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to worktree"
                }
            },
            "required": ["path"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = match input["path"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("path is required"),
        };

        let full_path = match ctx.validate_read_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        if full_path.is_dir() {
            ToolResult::success(format!("{} exists (directory)", path))
        } else if full_path.is_file() {
            ToolResult::success(format!("{} exists (file)", path))
        } else {
            ToolResult::success(format!("{} does not exist", path))
        }
    }
}
