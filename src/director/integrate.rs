//! Plan integration
//!
//! When a planner wave finishes, the director folds the planners' proposed
//! tasks into the run's DAG through four passes:
//!
//! 1. LLM: deduplicate proposals and drop out-of-scope ones.
//! 1.5 deterministic: link feature tasks to the foundation task when one
//!     exists.
//! 2. LLM: resolve free-text `dependency_queries` against the now-known
//!    task set into concrete `depends_on` ids.
//! 3. optional deterministic: transitive reduction to keep the DAG minimal.
//!
//! Acyclicity is preserved throughout: any proposed edge that would close a
//! cycle is dropped with a design-log note, never applied.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::DirectorConfig;
use crate::domain::{dag, DesignNote, Run, SuggestedTask, Task, TaskPhase, TaskStatus};
use crate::llm::{CompletionRequest, LlmInvoker, Message, ToolDefinition};

/// Markers that identify a foundation/infrastructure task
const FOUNDATION_MARKERS: &[&str] = &["foundation", "infrastructure", "scaffold", "setup", "bootstrap"];

/// Changed and new task records plus design notes, for the caller to merge
#[derive(Debug, Default)]
pub struct IntegrationChanges {
    pub tasks: Vec<Task>,
    pub notes: Vec<DesignNote>,
}

#[derive(Debug, Deserialize)]
struct SelectionPayload {
    keep: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct ResolutionPayload {
    resolutions: Vec<Resolution>,
}

#[derive(Debug, Deserialize)]
struct Resolution {
    task_id: String,
    query: String,
    #[serde(default)]
    depends_on: Vec<String>,
}

fn selection_tool() -> ToolDefinition {
    ToolDefinition::new(
        "submit_task_selection",
        "Submit the indices of proposed tasks to keep. Call exactly once.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "keep": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Zero-based indices of proposals to keep"
                }
            },
            "required": ["keep"]
        }),
    )
}

fn resolution_tool() -> ToolDefinition {
    ToolDefinition::new(
        "submit_dependency_resolutions",
        "Resolve each dependency query to concrete task ids. Call exactly once.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "resolutions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task_id": { "type": "string" },
                            "query": { "type": "string" },
                            "depends_on": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Ids of tasks satisfying the query; empty if none"
                            }
                        },
                        "required": ["task_id", "query", "depends_on"]
                    }
                }
            },
            "required": ["resolutions"]
        }),
    )
}

/// Run plan integration over a run snapshot
///
/// Returns the full records of every task that changed (sources with
/// consumed proposals, new tasks, tasks with rewritten dependencies).
pub async fn integrate(
    invoker: &Arc<dyn LlmInvoker>,
    config: &DirectorConfig,
    run: &Run,
) -> Result<IntegrationChanges> {
    debug!(run_id = %run.run_id, "integrate: called");

    let mut working: Vec<Task> = run.tasks.clone();
    let mut notes: Vec<DesignNote> = Vec::new();

    // Gather proposals from every completed source task
    let mut proposals: Vec<(String, SuggestedTask)> = Vec::new();
    for task in &working {
        for suggestion in &task.suggested_tasks {
            proposals.push((task.id.clone(), suggestion.clone()));
        }
    }

    // Pass 1 (LLM): deduplicate and de-scope
    let kept: Vec<(String, SuggestedTask)> = if proposals.is_empty() {
        Vec::new()
    } else {
        select_proposals(invoker, run, &proposals).await?
    };
    if kept.len() < proposals.len() {
        notes.push(DesignNote::new(
            "Plan integration selection",
            format!("Kept {} of {} proposed tasks after deduplication", kept.len(), proposals.len()),
        ));
    }

    // Materialize kept proposals; depends_on entries name titles or ids
    let mut title_to_id: HashMap<String, String> =
        working.iter().map(|t| (t.title.clone(), t.id.clone())).collect();
    let known_ids: Vec<String> = working.iter().map(|t| t.id.clone()).collect();

    let mut new_tasks: Vec<Task> = Vec::new();
    for (_source, suggestion) in kept {
        let task = suggestion.into_task();
        title_to_id.entry(task.title.clone()).or_insert_with(|| task.id.clone());
        new_tasks.push(task);
    }

    // Map dependency references now that the whole batch has ids
    for task in &mut new_tasks {
        let mut resolved: Vec<String> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();
        for dep in task.depends_on.drain(..) {
            if known_ids.contains(&dep) || new_tasks_contains_id(&title_to_id, &dep) {
                resolved.push(dep);
            } else if let Some(id) = title_to_id.get(&dep) {
                if *id != task.id {
                    resolved.push(id.clone());
                }
            } else {
                // Unknown reference becomes a query for Pass 2
                unresolved.push(dep);
            }
        }
        task.depends_on = resolved;
        task.dependency_queries.extend(unresolved);
    }

    working.extend(new_tasks.iter().cloned());

    // Pass 1.5 (deterministic): feature tasks depend on the foundation task
    if let Some(foundation_id) = find_foundation(&working) {
        let mut linked = 0;
        let snapshot = working.clone();
        for task in working.iter_mut() {
            let is_new = new_tasks.iter().any(|n| n.id == task.id);
            if !is_new || task.id == foundation_id {
                continue;
            }
            if !matches!(task.phase, TaskPhase::Build | TaskPhase::Test) {
                continue;
            }
            let already = task.depends_on.contains(&foundation_id)
                || dag::would_create_cycle(&snapshot, task.id.as_str(), foundation_id.as_str());
            if !already {
                task.depends_on.push(foundation_id.clone());
                linked += 1;
            }
        }
        if linked > 0 {
            debug!(linked, %foundation_id, "integrate: foundation links added");
        }
    }

    // Pass 2 (LLM): resolve free-text dependency queries
    let queries: Vec<(String, String)> = working
        .iter()
        .filter(|t| !t.status.is_terminal())
        .flat_map(|t| t.dependency_queries.iter().map(|q| (t.id.clone(), q.clone())))
        .collect();

    if !queries.is_empty() {
        let resolutions = resolve_queries(invoker, run, &working, &queries).await?;
        let valid_ids: Vec<String> = working.iter().map(|t| t.id.clone()).collect();

        for resolution in resolutions {
            let Some(task) = working.iter_mut().find(|t| t.id == resolution.task_id) else {
                continue;
            };
            let mut applied = false;
            for dep in &resolution.depends_on {
                if !valid_ids.contains(dep) {
                    warn!(task_id = %task.id, dep = %dep, "integrate: resolution names unknown task");
                    continue;
                }
                if *dep != task.id && !task.depends_on.contains(dep) {
                    task.depends_on.push(dep.clone());
                    applied = true;
                }
            }
            if !applied && resolution.depends_on.is_empty() {
                debug!(task_id = %task.id, query = %resolution.query, "integrate: query resolved to nothing");
            }
        }
        // Queries are consumed whether or not they resolved
        for task in working.iter_mut() {
            if !task.dependency_queries.is_empty() && !task.status.is_terminal() {
                task.dependency_queries.clear();
            }
        }
    }

    // Acyclicity: drop offending edges rather than reject the whole plan
    let mut guard = 0;
    while let Some(cycle) = dag::find_cycle(&working) {
        guard += 1;
        if guard > 100 {
            eyre::bail!("cycle elimination did not converge");
        }
        let from = cycle[cycle.len() - 2].clone();
        let to = cycle[cycle.len() - 1].clone();
        if let Some(task) = working.iter_mut().find(|t| t.id == from) {
            task.depends_on.retain(|d| *d != to);
            warn!(%from, %to, "integrate: dropped cycle-forming dependency edge");
            notes.push(DesignNote::new(
                "Dropped cyclic dependency",
                format!("Edge {} -> {} would create a cycle ({}) and was dropped", from, to, cycle.join(" -> ")),
            ));
        }
    }

    // Pass 3 (optional, deterministic): keep the DAG minimal
    if config.transitive_reduction {
        let removed = dag::transitive_reduction(&mut working);
        if removed > 0 {
            debug!(removed, "integrate: transitive reduction removed edges");
            notes.push(DesignNote::new(
                "Transitive reduction",
                format!("Removed {} dependency edge(s) implied by longer paths", removed),
            ));
        }
    }

    // Consume the proposals on the source tasks
    for task in working.iter_mut() {
        if !task.suggested_tasks.is_empty() {
            task.suggested_tasks.clear();
        }
    }

    // Emit only records that differ from the input snapshot
    let original: HashMap<&str, &Task> = run.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let changed: Vec<Task> = working
        .into_iter()
        .filter(|t| match original.get(t.id.as_str()) {
            Some(before) => task_differs(before, t),
            None => true,
        })
        .collect();

    info!(
        new_or_changed = changed.len(),
        notes = notes.len(),
        "Plan integration complete"
    );
    Ok(IntegrationChanges { tasks: changed, notes })
}

fn new_tasks_contains_id(title_to_id: &HashMap<String, String>, dep: &str) -> bool {
    title_to_id.values().any(|id| id == dep)
}

fn task_differs(before: &Task, after: &Task) -> bool {
    before.depends_on != after.depends_on
        || before.dependency_queries != after.dependency_queries
        || before.suggested_tasks.len() != after.suggested_tasks.len()
        || before.status != after.status
}

/// Pick the foundation task, preferring non-terminal ones
fn find_foundation(tasks: &[Task]) -> Option<String> {
    tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Abandoned)
        .find(|t| {
            let haystack = format!("{} {}", t.title.to_lowercase(), t.component.to_lowercase());
            FOUNDATION_MARKERS.iter().any(|m| haystack.contains(m))
        })
        .map(|t| t.id.clone())
}

async fn select_proposals(
    invoker: &Arc<dyn LlmInvoker>,
    run: &Run,
    proposals: &[(String, SuggestedTask)],
) -> Result<Vec<(String, SuggestedTask)>> {
    let existing: Vec<String> = run
        .tasks
        .iter()
        .map(|t| format!("- {} ({}, {})", t.title, t.phase, t.status))
        .collect();
    let listed: Vec<String> = proposals
        .iter()
        .enumerate()
        .map(|(i, (_, s))| format!("[{}] {} ({}): {}", i, s.title, s.phase, s.description))
        .collect();

    let prompt = format!(
        "Objective:\n{}\n\nExisting tasks:\n{}\n\nProposed tasks:\n{}\n\n\
         Keep every proposal that adds in-scope, non-duplicate work. Drop \
         duplicates (keep the more specific variant) and anything outside \
         the objective.",
        run.objective,
        existing.join("\n"),
        listed.join("\n")
    );

    let request = CompletionRequest {
        system_prompt: "You curate the task list of a multi-agent engineering run.".to_string(),
        messages: vec![Message::user(prompt)],
        tools: vec![selection_tool()],
        max_tokens: 4096,
    };

    let response = invoker.complete(request).await.context("task selection call failed")?;
    let call = response
        .tool_calls
        .iter()
        .find(|c| c.name == "submit_task_selection")
        .ok_or_else(|| eyre::eyre!("selection response contained no submit_task_selection call"))?;
    let payload: SelectionPayload = serde_json::from_value(call.input.clone()).context("invalid selection payload")?;

    let mut kept = Vec::new();
    for index in payload.keep {
        if let Some(entry) = proposals.get(index) {
            kept.push(entry.clone());
        }
    }
    Ok(kept)
}

async fn resolve_queries(
    invoker: &Arc<dyn LlmInvoker>,
    run: &Run,
    tasks: &[Task],
    queries: &[(String, String)],
) -> Result<Vec<Resolution>> {
    let catalog: Vec<String> = tasks
        .iter()
        .map(|t| format!("- {} :: {} ({}, {})", t.id, t.title, t.phase, t.status))
        .collect();
    let listed: Vec<String> = queries
        .iter()
        .map(|(task_id, query)| format!("- task {} asks: {}", task_id, query))
        .collect();

    let prompt = format!(
        "Objective:\n{}\n\nTask catalog:\n{}\n\nDependency queries:\n{}\n\n\
         For each query, name the task ids (from the catalog) that satisfy \
         it. Use an empty list when nothing matches.",
        run.objective,
        catalog.join("\n"),
        listed.join("\n")
    );

    let request = CompletionRequest {
        system_prompt: "You resolve dependency references in a task graph.".to_string(),
        messages: vec![Message::user(prompt)],
        tools: vec![resolution_tool()],
        max_tokens: 4096,
    };

    let response = invoker.complete(request).await.context("dependency resolution call failed")?;
    let call = response
        .tool_calls
        .iter()
        .find(|c| c.name == "submit_dependency_resolutions")
        .ok_or_else(|| eyre::eyre!("resolution response contained no submit_dependency_resolutions call"))?;
    let payload: ResolutionPayload =
        serde_json::from_value(call.input.clone()).context("invalid resolution payload")?;
    Ok(payload.resolutions)
}
