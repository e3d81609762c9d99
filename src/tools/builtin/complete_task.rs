//! complete_task tool - the worker's terminal signal

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::domain::{Escalation, WorkerStatus};
use crate::tools::context::CompletionSignal;
use crate::tools::{Tool, ToolContext, ToolResult};

/// Signal that the worker has finished (or cannot finish) its task
pub struct CompleteTaskTool;

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &'static str {
        "complete_task"
    }

    fn description(&self) -> &'static str {
        "Signal that you are done with the task. status=complete when the work is \
         finished, blocked when you cannot proceed, failed when the approach did \
         not work, waiting_subtask after proposing subtasks that must run first."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["complete", "blocked", "failed", "waiting_subtask"]
                },
                "summary": {
                    "type": "string",
                    "description": "What was done, or why it could not be done"
                },
                "result_path": {
                    "type": "string",
                    "description": "Relative path of the main artifact, if any"
                },
                "escalation": {
                    "type": "object",
                    "properties": {
                        "kind": { "type": "string" },
                        "reason": { "type": "string" },
                        "suggested_action": { "type": "string" }
                    },
                    "required": ["kind", "reason"]
                }
            },
            "required": ["status", "summary"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        debug!(task_id = %ctx.task_id, "CompleteTaskTool::execute: called");
        let status: WorkerStatus = match serde_json::from_value(input["status"].clone()) {
            Ok(s) => s,
            Err(_) => return ToolResult::error("status must be complete|blocked|failed|waiting_subtask"),
        };
        let summary = match input["summary"].as_str() {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => return ToolResult::error("summary is required"),
        };

        let escalation: Option<Escalation> = if input["escalation"].is_object() {
            match serde_json::from_value(input["escalation"].clone()) {
                Ok(e) => Some(e),
                Err(e) => return ToolResult::error(format!("Invalid escalation: {}", e)),
            }
        } else {
            None
        };

        let mut channel = ctx.side_channel.lock().await;
        if channel.completion.is_some() {
            return ToolResult::error("Task already marked complete");
        }
        channel.completion = Some(CompletionSignal {
            status,
            summary,
            result_path: input["result_path"].as_str().map(|s| s.to_string()),
            escalation,
        });

        debug!(%status, "CompleteTaskTool::execute: completion recorded");
        ToolResult::success(format!("Task marked {}", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_complete_task_records_signal() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = CompleteTaskTool
            .execute(
                serde_json::json!({
                    "status": "complete",
                    "summary": "wrote the file",
                    "result_path": "hello.txt"
                }),
                &ctx,
            )
            .await;

        assert!(!result.is_error);
        let channel = ctx.side_channel.lock().await;
        let signal = channel.completion.as_ref().unwrap();
        assert_eq!(signal.status, WorkerStatus::Complete);
        assert_eq!(signal.result_path.as_deref(), Some("hello.txt"));
    }

    #[tokio::test]
    async fn test_complete_task_with_escalation() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        CompleteTaskTool
            .execute(
                serde_json::json!({
                    "status": "blocked",
                    "summary": "cannot proceed",
                    "escalation": {
                        "kind": "worker_blocked",
                        "reason": "missing credentials",
                        "suggested_action": "provide API key"
                    }
                }),
                &ctx,
            )
            .await;

        let channel = ctx.side_channel.lock().await;
        let signal = channel.completion.as_ref().unwrap();
        assert_eq!(signal.status, WorkerStatus::Blocked);
        assert_eq!(signal.escalation.as_ref().unwrap().kind, "worker_blocked");
    }

    #[tokio::test]
    async fn test_complete_task_rejects_unknown_status() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = CompleteTaskTool
            .execute(serde_json::json!({"status": "done", "summary": "x"}), &ctx)
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_double_completion_rejected() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        CompleteTaskTool
            .execute(serde_json::json!({"status": "complete", "summary": "first"}), &ctx)
            .await;
        let second = CompleteTaskTool
            .execute(serde_json::json!({"status": "failed", "summary": "second"}), &ctx)
            .await;

        assert!(second.is_error);
    }
}
