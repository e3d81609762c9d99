//! grep tool - in-process content search

use async_trait::async_trait;
use grep_regex::RegexMatcherBuilder;
use grep_searcher::sinks::UTF8;
use grep_searcher::SearcherBuilder;
use serde_json::{json, Value};
use std::path::Path;
use walkdir::WalkDir;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Search file contents for a regex pattern
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn description(&self) -> &'static str {
        "Search file contents for a regex pattern. Returns file:line:content matches."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Path to search in (relative to worktree, default: '.')"
                },
                "file_pattern": {
                    "type": "string",
                    "description": "Only search files whose name matches this glob (e.g. '*.rs')"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case-insensitive search (default: false)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum matching lines to return (default: 50)"
                }
            },
            "required": ["pattern"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let pattern = match input.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: pattern"),
        };
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let file_pattern = input.get("file_pattern").and_then(|v| v.as_str());
        let case_insensitive = input.get("case_insensitive").and_then(|v| v.as_bool()).unwrap_or(false);
        let max_results = input.get("max_results").and_then(|v| v.as_u64()).unwrap_or(50) as usize;

        let search_path = match ctx.validate_read_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid path: {}", e)),
        };

        let matcher = match RegexMatcherBuilder::new().case_insensitive(case_insensitive).build(pattern) {
            Ok(m) => m,
            Err(e) => return ToolResult::error(format!("Invalid pattern: {}", e)),
        };

        let name_filter = match file_pattern.map(glob::Pattern::new) {
            Some(Ok(p)) => Some(p),
            Some(Err(e)) => return ToolResult::error(format!("Invalid file_pattern: {}", e)),
            None => None,
        };

        let mut searcher = SearcherBuilder::new().line_number(true).build();
        let mut matches: Vec<String> = Vec::new();

        let files = WalkDir::new(&search_path)
            .into_iter()
            .filter_entry(|e| e.file_name().to_string_lossy() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        'files: for entry in files {
            if let Some(filter) = &name_filter {
                let name = entry.file_name().to_string_lossy();
                if !filter.matches(&name) {
                    continue;
                }
            }

            let display = entry
                .path()
                .strip_prefix(&search_path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();

            let mut full = false;
            let result = searcher.search_path(
                &matcher,
                entry.path(),
                UTF8(|line_number, line| {
                    matches.push(format!("{}:{}:{}", display, line_number, line.trim_end()));
                    if matches.len() >= max_results {
                        full = true;
                        return Ok(false);
                    }
                    Ok(true)
                }),
            );
            // Binary or unreadable files are skipped, not fatal
            if result.is_err() {
                continue;
            }
            if full {
                matches.push(format!("... (truncated at {} matches)", max_results));
                break 'files;
            }
        }

        if matches.is_empty() {
            ToolResult::success("No matches found.")
        } else {
            ToolResult::success(matches.join("\n"))
        }
    }
}
