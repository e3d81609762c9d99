//! submit_verdict tool - QA profile's structured verdict channel

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::domain::QaVerdict;
use crate::tools::{Tool, ToolContext, ToolResult};

/// Submit the QA verdict for the task under review
pub struct SubmitVerdictTool;

#[async_trait]
impl Tool for SubmitVerdictTool {
    fn name(&self) -> &'static str {
        "submit_verdict"
    }

    fn description(&self) -> &'static str {
        "Submit the QA verdict. Call exactly once, after inspecting the work. \
         On failure, give feedback concrete enough for a retry to act on. \
         For test-phase reviews, classify each reported failure: is the test \
         wrong, the code wrong, or both?"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pass": { "type": "boolean" },
                "feedback": {
                    "type": "string",
                    "description": "Required when pass is false"
                },
                "failure_analysis": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "test": { "type": "string" },
                            "blame": {
                                "type": "string",
                                "enum": ["code_wrong", "test_wrong", "both_wrong"]
                            },
                            "notes": { "type": "string" }
                        },
                        "required": ["test", "blame", "notes"]
                    }
                },
                "tests_needing_revision": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "refined_test_criteria": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Sharper acceptance criteria for the paired test task"
                }
            },
            "required": ["pass"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        debug!(task_id = %ctx.task_id, "SubmitVerdictTool::execute: called");
        let verdict: QaVerdict = match serde_json::from_value(input) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("Invalid verdict payload: {}", e)),
        };

        if !verdict.pass && verdict.feedback.trim().is_empty() {
            return ToolResult::error("feedback is required for a failing verdict");
        }

        let mut channel = ctx.side_channel.lock().await;
        if channel.qa_verdict.is_some() {
            return ToolResult::error("Verdict already submitted");
        }
        let pass = verdict.pass;
        channel.qa_verdict = Some(verdict);

        debug!(pass, "SubmitVerdictTool::execute: verdict recorded");
        ToolResult::success(if pass { "Verdict recorded: PASS" } else { "Verdict recorded: FAIL" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_submit_pass_verdict() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = SubmitVerdictTool
            .execute(serde_json::json!({"pass": true, "feedback": ""}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(ctx.side_channel.lock().await.qa_verdict.as_ref().unwrap().pass);
    }

    #[tokio::test]
    async fn test_fail_requires_feedback() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        let result = SubmitVerdictTool.execute(serde_json::json!({"pass": false}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_double_submission_rejected() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        SubmitVerdictTool
            .execute(serde_json::json!({"pass": true}), &ctx)
            .await;
        let second = SubmitVerdictTool
            .execute(serde_json::json!({"pass": false, "feedback": "x"}), &ctx)
            .await;

        assert!(second.is_error);
        assert!(ctx.side_channel.lock().await.qa_verdict.as_ref().unwrap().pass);
    }

    #[tokio::test]
    async fn test_failure_analysis_parsed() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t-1".to_string());

        SubmitVerdictTool
            .execute(
                serde_json::json!({
                    "pass": true,
                    "failure_analysis": [
                        {"test": "test_edge", "blame": "test_wrong", "notes": "asserts stale format"}
                    ],
                    "tests_needing_revision": ["test_edge"]
                }),
                &ctx,
            )
            .await;

        let channel = ctx.side_channel.lock().await;
        let verdict = channel.qa_verdict.as_ref().unwrap();
        assert_eq!(verdict.tests_needing_revision, vec!["test_edge"]);
        assert_eq!(verdict.failure_analysis.len(), 1);
    }
}
