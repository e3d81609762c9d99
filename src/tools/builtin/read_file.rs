//! read tool - inspect file contents by line range

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Budget for one read; a range that blows past this asks the agent to
/// narrow instead of silently clipping the middle of lines
const READ_BUDGET_BYTES: usize = 48 * 1024;

/// Read a file, whole or by line range
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read"
    }

    fn description(&self) -> &'static str {
        "Read a file, optionally a line range. A file must be read before it \
         can be overwritten or edited."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to worktree"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to include, 1-based (default: 1)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to include, inclusive (default: end of file)"
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
        let start_line = input["start_line"].as_u64().unwrap_or(1).max(1) as usize;
        let end_line = input["end_line"].as_u64().map(|e| e as usize);

        let full_path = match ctx.validate_read_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Cannot read {}: {}", path, e)),
        };

        // Any successful read unlocks writes to this file
        ctx.track_read(&full_path).await;

        let all_lines: Vec<&str> = content.lines().collect();
        let total = all_lines.len();
        if total == 0 {
            return ToolResult::success(format!("== {} (empty file) ==", path));
        }
        if start_line > total {
            return ToolResult::error(format!(
                "start_line {} is past the end of {} ({} lines)",
                start_line, path, total
            ));
        }
        let last = end_line.unwrap_or(total).min(total);
        if last < start_line {
            return ToolResult::error("end_line is before start_line");
        }

        let mut rendered = format!("== {} (lines {}-{} of {}) ==\n", path, start_line, last, total);
        let mut budget = READ_BUDGET_BYTES;
        let mut shown_until = start_line - 1;

        for (offset, line) in all_lines[start_line - 1..last].iter().enumerate() {
            let numbered = format!("{:4} | {}\n", start_line + offset, line);
            if numbered.len() > budget {
                rendered.push_str(&format!(
                    "[stopped at line {}; request a narrower range for the rest]\n",
                    shown_until
                ));
                break;
            }
            budget -= numbered.len();
            rendered.push_str(&numbered);
            shown_until = start_line + offset;
        }

        ToolResult::success(rendered.trim_end().to_string())
    }
}
