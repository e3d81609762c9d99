//! write_report tool - tester result report at the conventional path

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Conventional location of a tester's result report, relative to the
/// worktree
pub const REPORT_PATH: &str = "reports/test_report.md";

/// Write the tester's result report
///
/// Absence of this report when a tester finishes is an automatic failure,
/// so the tool also records the path on the side channel.
pub struct WriteReportTool;

#[async_trait]
impl Tool for WriteReportTool {
    fn name(&self) -> &'static str {
        "write_report"
    }

    fn description(&self) -> &'static str {
        "Write the test result report. Testers must call this before completing."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "Markdown report: what was tested, results, failures"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let content = match input["content"].as_str() {
            Some(c) => c,
            None => return ToolResult::error("content is required"),
        };

        let full_path = match ctx.validate_write_path(Path::new(REPORT_PATH)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        if let Some(parent) = full_path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::error(format!("Failed to create report directory: {}", e));
        }

        if let Err(e) = tokio::fs::write(&full_path, content).await {
            return ToolResult::error(format!("Failed to write report: {}", e));
        }

        ctx.side_channel.lock().await.report_path = Some(REPORT_PATH.to_string());
        ctx.track_read(&full_path).await;

        ToolResult::success(format!("Report written to {}", REPORT_PATH))
    }
}
