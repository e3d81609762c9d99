//! glob tool - find files by pattern

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Find files matching a glob pattern
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &'static str {
        "glob"
    }

    fn description(&self) -> &'static str {
        "Find files matching a glob pattern like 'src/**/*.rs'. Paths are relative to the worktree."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern relative to worktree"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results (default: 200)"
                }
            },
            "required": ["pattern"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let pattern = match input["pattern"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("pattern is required"),
        };
        let max_results = input["max_results"].as_u64().unwrap_or(200) as usize;

        // Anchor the pattern inside the worktree; absolute patterns are
        // rejected rather than resolved
        if pattern.starts_with('/') {
            return ToolResult::error("pattern must be relative to the worktree");
        }
        let anchored = ctx.worktree.join(pattern).to_string_lossy().to_string();

        let paths = match glob::glob(&anchored) {
            Ok(paths) => paths,
            Err(e) => return ToolResult::error(format!("Invalid glob pattern: {}", e)),
        };

        let mut matches: Vec<String> = Vec::new();
        for entry in paths.filter_map(|p| p.ok()) {
            if matches.len() >= max_results {
                matches.push("... (truncated)".to_string());
                break;
            }
            let relative = entry.strip_prefix(&ctx.worktree).unwrap_or(&entry);
            matches.push(relative.to_string_lossy().to_string());
        }

        if matches.is_empty() {
            ToolResult::success("No files matched.")
        } else {
            ToolResult::success(matches.join("\n"))
        }
    }
}
