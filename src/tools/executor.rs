//! ToolExecutor - the tool registry and dispatcher
//!
//! Tool definitions are data (name, schema, description); execution
//! dispatches to the named implementation. Profile-specific tool selection
//! is a filter over this registry via [`definitions_for`](ToolExecutor::definitions_for).

use std::collections::HashMap;

use crate::llm::{ToolCall, ToolDefinition};

use super::builtin::{
    CompleteTaskTool, CreateSubtasksTool, EditFileTool, FileExistsTool, GlobTool, GrepTool, ListDirectoryTool,
    PostInsightTool, ReadFileTool, RunCommandTool, SubmitVerdictTool, WriteFileTool, WriteReportTool,
};
use super::{Tool, ToolContext, ToolResult};

/// Manages tool execution for a worker
pub struct ToolExecutor {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolExecutor {
    /// Create executor with the standard tool set
    pub fn standard() -> Self {
        let mut tools: HashMap<String, Box<dyn Tool>> = HashMap::new();

        // File system tools
        tools.insert("read".into(), Box::new(ReadFileTool));
        tools.insert("write".into(), Box::new(WriteFileTool));
        tools.insert("edit".into(), Box::new(EditFileTool));
        tools.insert("list".into(), Box::new(ListDirectoryTool));
        tools.insert("glob".into(), Box::new(GlobTool));
        tools.insert("grep".into(), Box::new(GrepTool));
        tools.insert("file_exists".into(), Box::new(FileExistsTool));

        // Command execution
        tools.insert("bash".into(), Box::new(RunCommandTool));

        // Structured output
        tools.insert("write_report".into(), Box::new(WriteReportTool));
        tools.insert("create_subtasks".into(), Box::new(CreateSubtasksTool));
        tools.insert("post_insight".into(), Box::new(PostInsightTool));
        tools.insert("submit_verdict".into(), Box::new(SubmitVerdictTool));
        tools.insert("complete_task".into(), Box::new(CompleteTaskTool));

        Self { tools }
    }

    /// Create an empty executor (for testing)
    pub fn empty() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Add a tool to the executor
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get tool definitions for the LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Get definitions for a subset of tools by name
    pub fn definitions_for(&self, tool_names: &[String]) -> Vec<ToolDefinition> {
        tool_names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Names of the read-only subset (the QA profile's selection basis)
    pub fn read_only_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|t| t.read_only())
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Execute a tool call
    pub async fn execute(&self, tool_call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        match self.tools.get(&tool_call.name) {
            Some(tool) => tool.execute(tool_call.input.clone(), ctx).await,
            None => ToolResult::error(format!("Unknown tool: {}", tool_call.name)),
        }
    }

    /// Execute multiple tool calls in order
    pub async fn execute_all(&self, tool_calls: &[ToolCall], ctx: &ToolContext) -> Vec<(String, ToolResult)> {
        let mut results = Vec::with_capacity(tool_calls.len());

        for call in tool_calls {
            let result = self.execute(call, ctx).await;
            results.push((call.id.clone(), result));
        }

        results
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get tool names
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::standard()
    }
}
