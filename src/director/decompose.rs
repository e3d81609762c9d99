//! Initial decomposition
//!
//! The director's first invocation turns the raw objective into a design
//! document plus a small wave of planner tasks. The LLM must answer through
//! a single forced tool call so the output parses deterministically.

use std::sync::Arc;

use eyre::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{DesignNote, Task, TaskPhase, WorkerProfile};
use crate::llm::{CompletionRequest, LlmInvoker, Message, ToolDefinition};

const DECOMPOSE_PROMPT: &str = "\
You are the director of a multi-agent engineering run. Study the objective \
and produce (1) a short design document describing the intended approach and \
component breakdown, and (2) between one and five planner tasks, each owning \
a coherent slice of the work. Planner tasks run in parallel and later \
decompose their slice into build and test tasks, so slice boundaries should \
minimize coupling.

Submit exactly one submit_decomposition call.";

/// One planner task seed from the decomposition
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSeed {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub priority: i32,
}

/// Parsed decomposition output
#[derive(Debug, Clone, Deserialize)]
pub struct Decomposition {
    pub design_document: String,
    pub planner_tasks: Vec<PlannerSeed>,
}

fn submit_tool() -> ToolDefinition {
    ToolDefinition::new(
        "submit_decomposition",
        "Submit the design document and the planner tasks. Call exactly once.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "design_document": {
                    "type": "string",
                    "description": "Markdown design document for the run"
                },
                "planner_tasks": {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": 5,
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "component": { "type": "string" },
                            "priority": { "type": "integer" }
                        },
                        "required": ["title", "description"]
                    }
                }
            },
            "required": ["design_document", "planner_tasks"]
        }),
    )
}

/// Decompose an objective into a design document and planner tasks
pub async fn decompose(
    invoker: &Arc<dyn LlmInvoker>,
    objective: &str,
    spec: &serde_json::Map<String, serde_json::Value>,
    max_planner_tasks: usize,
) -> Result<(String, Vec<Task>, DesignNote)> {
    debug!("decompose: called");

    let mut prompt = format!("Objective:\n{}", objective);
    if !spec.is_empty() {
        prompt.push_str(&format!(
            "\n\nStructured specification:\n{}",
            serde_json::to_string_pretty(spec).unwrap_or_default()
        ));
    }

    let request = CompletionRequest {
        system_prompt: DECOMPOSE_PROMPT.to_string(),
        messages: vec![Message::user(prompt)],
        tools: vec![submit_tool()],
        max_tokens: 8192,
    };

    let response = invoker
        .complete(request)
        .await
        .context("LLM decomposition call failed")?;

    let call = response
        .tool_calls
        .iter()
        .find(|c| c.name == "submit_decomposition")
        .ok_or_else(|| eyre::eyre!("decomposition response contained no submit_decomposition call"))?;

    let decomposition: Decomposition =
        serde_json::from_value(call.input.clone()).context("invalid decomposition payload")?;

    if decomposition.planner_tasks.is_empty() {
        bail!("decomposition produced no planner tasks");
    }

    let seeds: Vec<PlannerSeed> = decomposition.planner_tasks.into_iter().take(max_planner_tasks).collect();

    let tasks: Vec<Task> = seeds
        .into_iter()
        .map(|seed| {
            Task::new(seed.title, TaskPhase::Plan)
                .with_description(seed.description)
                .with_component(seed.component)
                .with_priority(seed.priority)
                .with_profile(WorkerProfile::Planner)
        })
        .collect();

    let note = DesignNote::new("Initial decomposition", decomposition.design_document.clone());

    info!(planner_count = tasks.len(), "Objective decomposed into planner wave");
    Ok((decomposition.design_document, tasks, note))
}
