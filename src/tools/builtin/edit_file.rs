//! edit tool - targeted in-place text replacement

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolError, ToolResult};

/// Replace text in a file the worker has already read
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn description(&self) -> &'static str {
        "Replace text in a file. `find` must match exactly once unless \
         all=true. Read the file first."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to worktree"
                },
                "find": {
                    "type": "string",
                    "description": "Exact text to locate, including whitespace"
                },
                "replace": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default: false)"
                }
            },
            "required": ["path", "find", "replace"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = match input["path"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("path is required"),
        };
        let find = match input["find"].as_str().filter(|f| !f.is_empty()) {
            Some(f) => f,
            None => return ToolResult::error("find is required and must be non-empty"),
        };
        let replace = match input["replace"].as_str() {
            Some(r) => r,
            None => return ToolResult::error("replace is required"),
        };
        let all = input["all"].as_bool().unwrap_or(false);

        let target = match ctx.validate_write_path(Path::new(path)) {
            Ok(t) => t,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if !ctx.was_read(&target).await {
            return ToolResult::error(
                ToolError::WriteWithoutRead {
                    path: path.to_string(),
                }
                .to_string(),
            );
        }

        let content = match tokio::fs::read_to_string(&target).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Cannot read {}: {}", path, e)),
        };

        match apply_replacement(&content, find, replace, all) {
            Ok(edit) => {
                if let Err(e) = tokio::fs::write(&target, &edit.content).await {
                    return ToolResult::error(format!("Cannot write {}: {}", path, e));
                }
                debug!(task_id = %ctx.task_id, %path, count = edit.count, "EditFileTool::execute: applied");
                if edit.count == 1 {
                    ToolResult::success(format!("replaced 1 occurrence at line {} of {}", edit.first_line, path))
                } else {
                    ToolResult::success(format!("replaced {} occurrences in {}", edit.count, path))
                }
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[derive(Debug)]
struct AppliedEdit {
    content: String,
    count: usize,
    /// 1-based line of the first replacement
    first_line: usize,
}

/// Pure replacement over file content
///
/// An ambiguous single-occurrence edit is rejected rather than guessed:
/// the agent either extends the needle or opts into `all`.
fn apply_replacement(content: &str, find: &str, replace: &str, all: bool) -> Result<AppliedEdit, ToolError> {
    let matches: Vec<usize> = content.match_indices(find).map(|(i, _)| i).collect();

    match matches.len() {
        0 => return Err(ToolError::PatternNotFound {
            pattern: find.to_string(),
        }),
        1 => {}
        n if !all => return Err(ToolError::PatternNotUnique { count: n }),
        _ => {}
    }

    let first_line = content[..matches[0]].bytes().filter(|b| *b == b'\n').count() + 1;
    let (content, count) = if all {
        (content.replace(find, replace), matches.len())
    } else {
        (content.replacen(find, replace, 1), 1)
    };

    Ok(AppliedEdit {
        content,
        count,
        first_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    async fn ctx_having_read(temp: &tempfile::TempDir, name: &str, content: &str) -> ToolContext {
        let path = temp.path().join(name);
        fs::write(&path, content).unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());
        ctx.track_read(&path).await;
        ctx
    }

    #[test]
    fn test_apply_single_replacement_with_line() {
        let edit = apply_replacement("fn a() {}\nfn b() {}\n", "fn b", "fn c", false).unwrap();
        assert_eq!(edit.content, "fn a() {}\nfn c() {}\n");
        assert_eq!(edit.count, 1);
        assert_eq!(edit.first_line, 2);
    }

    #[test]
    fn test_apply_missing_pattern() {
        let err = apply_replacement("abc", "zzz", "x", false).unwrap_err();
        assert!(matches!(err, ToolError::PatternNotFound { .. }));
    }

    #[test]
    fn test_apply_ambiguous_without_all() {
        let err = apply_replacement("x y x", "x", "z", false).unwrap_err();
        match err {
            ToolError::PatternNotUnique { count } => assert_eq!(count, 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_apply_all() {
        let edit = apply_replacement("x y x", "x", "z", true).unwrap();
        assert_eq!(edit.content, "z y z");
        assert_eq!(edit.count, 2);
        assert_eq!(edit.first_line, 1);
    }

    #[tokio::test]
    async fn test_edit_end_to_end() {
        let temp = tempdir().unwrap();
        let ctx = ctx_having_read(&temp, "code.rs", "let x = 1;\nlet y = 2;\n").await;

        let result = EditFileTool
            .execute(
                serde_json::json!({"path": "code.rs", "find": "let y = 2;", "replace": "let y = 3;"}),
                &ctx,
            )
            .await;

        assert!(!result.is_error);
        assert!(result.content.contains("at line 2"));
        assert_eq!(
            fs::read_to_string(temp.path().join("code.rs")).unwrap(),
            "let x = 1;\nlet y = 3;\n"
        );
    }

    #[tokio::test]
    async fn test_edit_requires_prior_read() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("code.rs"), "content").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = EditFileTool
            .execute(
                serde_json::json!({"path": "code.rs", "find": "content", "replace": "x"}),
                &ctx,
            )
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("read file before"));
    }

    #[tokio::test]
    async fn test_edit_ambiguity_surfaces_count() {
        let temp = tempdir().unwrap();
        let ctx = ctx_having_read(&temp, "code.rs", "dup dup dup").await;

        let result = EditFileTool
            .execute(
                serde_json::json!({"path": "code.rs", "find": "dup", "replace": "x"}),
                &ctx,
            )
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("3 times"));
    }

    #[tokio::test]
    async fn test_edit_all_occurrences() {
        let temp = tempdir().unwrap();
        let ctx = ctx_having_read(&temp, "code.rs", "dup dup dup").await;

        let result = EditFileTool
            .execute(
                serde_json::json!({"path": "code.rs", "find": "dup", "replace": "x", "all": true}),
                &ctx,
            )
            .await;

        assert!(result.content.contains("3 occurrences"));
        assert_eq!(fs::read_to_string(temp.path().join("code.rs")).unwrap(), "x x x");
    }

    #[tokio::test]
    async fn test_empty_find_rejected() {
        let temp = tempdir().unwrap();
        let ctx = ctx_having_read(&temp, "code.rs", "content").await;

        let result = EditFileTool
            .execute(serde_json::json!({"path": "code.rs", "find": "", "replace": "x"}), &ctx)
            .await;
        assert!(result.is_error);
    }
}
