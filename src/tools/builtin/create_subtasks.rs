//! create_subtasks tool - planner's task proposal channel

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::domain::{SuggestedTask, TaskPhase};
use crate::tools::{Tool, ToolContext, ToolResult};

/// Propose subtasks for director approval
///
/// The planner contract requires terminating through this tool with at
/// least one test task; the worker enforces that after the loop ends.
pub struct CreateSubtasksTool;

#[async_trait]
impl Tool for CreateSubtasksTool {
    fn name(&self) -> &'static str {
        "create_subtasks"
    }

    fn description(&self) -> &'static str {
        "Propose the tasks this plan decomposes into. Include at least one test task. \
         Reference dependencies by the titles of other proposed tasks, or describe them \
         in dependency_queries when the target task is not in this batch."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "component": { "type": "string" },
                            "phase": {
                                "type": "string",
                                "enum": ["plan", "build", "test"]
                            },
                            "depends_on": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Titles of other proposed tasks this depends on"
                            },
                            "dependency_queries": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Free-text clues for dependencies outside this batch"
                            },
                            "acceptance_criteria": {
                                "type": "array",
                                "items": { "type": "string" }
                            },
                            "priority": { "type": "integer" }
                        },
                        "required": ["title", "description", "phase"]
                    }
                }
            },
            "required": ["tasks"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        debug!(task_id = %ctx.task_id, "CreateSubtasksTool::execute: called");
        let tasks: Vec<SuggestedTask> = match serde_json::from_value(input["tasks"].clone()) {
            Ok(t) => t,
            Err(e) => return ToolResult::error(format!("Invalid tasks payload: {}", e)),
        };

        if tasks.is_empty() {
            return ToolResult::error("At least one task is required");
        }

        let count = tasks.len();
        let test_count = tasks.iter().filter(|t| t.phase == TaskPhase::Test).count();

        let mut channel = ctx.side_channel.lock().await;
        channel.suggested_tasks.extend(tasks);

        debug!(count, test_count, "CreateSubtasksTool::execute: tasks recorded");
        ToolResult::success(format!(
            "Recorded {} proposed task(s) ({} test task(s)) for director review",
            count, test_count
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_subtasks_records_proposals() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = CreateSubtasksTool
            .execute(
                serde_json::json!({
                    "tasks": [
                        {
                            "title": "Build parser",
                            "description": "Implement the parser",
                            "phase": "build",
                            "acceptance_criteria": ["parses valid input"]
                        },
                        {
                            "title": "Test parser",
                            "description": "Exercise the parser",
                            "phase": "test",
                            "depends_on": ["Build parser"]
                        }
                    ]
                }),
                &ctx,
            )
            .await;

        assert!(!result.is_error);
        let channel = ctx.side_channel.lock().await;
        assert_eq!(channel.suggested_tasks.len(), 2);
        assert_eq!(channel.suggested_tasks[1].depends_on, vec!["Build parser"]);
    }

    #[tokio::test]
    async fn test_create_subtasks_rejects_empty() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = CreateSubtasksTool
            .execute(serde_json::json!({"tasks": []}), &ctx)
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_create_subtasks_rejects_bad_phase() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = CreateSubtasksTool
            .execute(
                serde_json::json!({"tasks": [{"title": "x", "description": "y", "phase": "deploy"}]}),
                &ctx,
            )
            .await;
        assert!(result.is_error);
    }
}
