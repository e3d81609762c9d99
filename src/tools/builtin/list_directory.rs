//! list tool - directory listing

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

use crate::tools::{Tool, ToolContext, ToolResult};

/// List directory contents, optionally recursive
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list"
    }

    fn description(&self) -> &'static str {
        "List directory contents. Directories end with '/'. Use depth for recursion."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to worktree (default: '.')"
                },
                "depth": {
                    "type": "integer",
                    "description": "Recursion depth (default: 1)"
                }
            }
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = input["path"].as_str().unwrap_or(".");
        let depth = input["depth"].as_u64().unwrap_or(1) as usize;

        let full_path = match ctx.validate_read_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        if !full_path.is_dir() {
            return ToolResult::error(format!("Not a directory: {}", path));
        }

        let mut entries: Vec<String> = Vec::new();
        for entry in WalkDir::new(&full_path)
            .min_depth(1)
            .max_depth(depth.max(1))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name().to_string_lossy() != ".git")
            .filter_map(|e| e.ok())
        {
            let relative = entry
                .path()
                .strip_prefix(&full_path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if entry.file_type().is_dir() {
                entries.push(format!("{}/", relative));
            } else {
                entries.push(relative);
            }
        }

        if entries.is_empty() {
            return ToolResult::success("(empty directory)");
        }

        // Keep output bounded for deep trees
        let total = entries.len();
        if total > 500 {
            entries.truncate(500);
            entries.push(format!("... ({} entries total)", total));
        }

        ToolResult::success(entries.join("\n"))
    }
}
