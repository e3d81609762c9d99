//! post_insight tool - share a finding with the rest of the run

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Post an insight visible to every later worker in the run
pub struct PostInsightTool;

#[async_trait]
impl Tool for PostInsightTool {
    fn name(&self) -> &'static str {
        "post_insight"
    }

    fn description(&self) -> &'static str {
        "Record a durable insight other workers should know (conventions found, \
         gotchas, decisions). Keep it to one or two sentences."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The insight"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let content = match input["content"].as_str() {
            Some(c) if !c.trim().is_empty() => c.trim(),
            _ => return ToolResult::error("content is required"),
        };

        ctx.side_channel.lock().await.insights.push(content.to_string());
        ToolResult::success("Insight recorded")
    }
}
