//! Worker runner - the agent loop
//!
//! One execution drives the LlmInvoker with a conversation, a
//! profile-filtered tool schema bound to the task's worktree, and a bounded
//! turn count. The loop ends on a complete_task signal, turn exhaustion,
//! cancellation, or a pathological repetition pattern. The runner never
//! touches the store; it returns a [`WorkerReport`] for the dispatch loop.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Aar, Task, TaskPhase, WorkerProfile, WorkerStatus};
use crate::llm::{CompletionRequest, CompletionResponse, ContentBlock, LlmError, LlmInvoker, Message, StopReason};
use crate::queue::CancelToken;
use crate::tools::{ToolContext, ToolExecutor, ToolResult};

use super::profile::{system_prompt, tools_for};
use super::result::WorkerReport;

/// Consecutive identical tool calls tolerated before the loop is declared
/// pathological
const MAX_REPEATED_CALLS: u32 = 3;

/// Errors a worker execution can raise
///
/// Contract violations (planner without subtasks, tester without report)
/// are not errors; they produce a failed report.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("LLM failure: {0}")]
    Llm(#[from] LlmError),

    #[error("Worker cancelled")]
    Cancelled,
}

/// Profile-dispatched agent executor
pub struct Worker {
    invoker: Arc<dyn LlmInvoker>,
    max_turns: u32,
    max_tokens: u32,
}

impl Worker {
    pub fn new(invoker: Arc<dyn LlmInvoker>, max_turns: u32) -> Self {
        Self {
            invoker,
            max_turns,
            max_tokens: 16384,
        }
    }

    /// Run the agent loop for a task
    ///
    /// `briefing` carries run-level context (objective, insights, design
    /// notes) rendered by the caller.
    pub async fn execute(
        &self,
        task: &Task,
        ctx: &ToolContext,
        briefing: &str,
        cancel: &CancelToken,
    ) -> Result<WorkerReport, WorkerError> {
        info!(task_id = %task.id, profile = %task.assigned_worker_profile, "Worker starting");

        let executor = ToolExecutor::standard();
        let tool_names = tools_for(task.assigned_worker_profile);
        let tool_defs = executor.definitions_for(&tool_names);
        let system = system_prompt(task, &ctx.worktree.display().to_string());

        let mut messages = vec![Message::user(format!(
            "Begin working on the task.\n\n{}",
            briefing
        ))];
        let mut last_text: Option<String> = None;
        let mut last_signature: Option<String> = None;
        let mut repeats: u32 = 0;
        let mut pathological = false;
        let mut turn = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(task_id = %task.id, "Worker::execute: cancelled");
                return Err(WorkerError::Cancelled);
            }

            turn += 1;
            if turn > self.max_turns {
                warn!(task_id = %task.id, max_turns = self.max_turns, "Worker turn budget exhausted");
                break;
            }

            let request = CompletionRequest {
                system_prompt: system.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                max_tokens: self.max_tokens,
            };

            let response = self.invoker.complete(request).await?;
            if let Some(text) = &response.content {
                last_text = Some(text.clone());
            }
            messages.push(build_assistant_message(&response));

            match response.stop_reason {
                StopReason::EndTurn | StopReason::StopSequence => {
                    debug!(task_id = %task.id, turn, "Worker::execute: model ended its turn");
                    break;
                }
                StopReason::MaxTokens => {
                    messages.push(Message::user(
                        "Continue from where you left off. Your previous response was truncated.",
                    ));
                }
                StopReason::ToolUse => {
                    // Pathological pattern: the same call repeated verbatim
                    let signature = response
                        .tool_calls
                        .iter()
                        .map(|c| format!("{}:{}", c.name, c.input))
                        .collect::<Vec<_>>()
                        .join("|");
                    if Some(&signature) == last_signature.as_ref() {
                        repeats += 1;
                        if repeats >= MAX_REPEATED_CALLS {
                            warn!(task_id = %task.id, "Worker repeating the same tool call, aborting loop");
                            pathological = true;
                            break;
                        }
                    } else {
                        repeats = 0;
                        last_signature = Some(signature);
                    }

                    let results = executor.execute_all(&response.tool_calls, ctx).await;
                    messages.push(build_tool_result_message(&results));

                    // A completion signal ends the loop without another
                    // turn; for the QA profile the verdict is the terminal
                    // output
                    {
                        let channel = ctx.side_channel.lock().await;
                        let verdict_done =
                            task.assigned_worker_profile == WorkerProfile::Qa && channel.qa_verdict.is_some();
                        if channel.completion.is_some() || verdict_done {
                            debug!(task_id = %task.id, turn, "Worker::execute: terminal signal");
                            break;
                        }
                    }
                }
            }
        }

        let report = self.build_report(task, ctx, messages, last_text, pathological).await;
        info!(task_id = %task.id, status = %report.status, "Worker finished");
        Ok(report)
    }

    /// Assemble the report from the side channel and enforce profile
    /// contracts
    async fn build_report(
        &self,
        task: &Task,
        ctx: &ToolContext,
        messages: Vec<Message>,
        last_text: Option<String>,
        pathological: bool,
    ) -> WorkerReport {
        let mut channel = ctx.side_channel.lock().await;

        let mut report = WorkerReport {
            messages,
            insights: std::mem::take(&mut channel.insights),
            suggested_tasks: std::mem::take(&mut channel.suggested_tasks),
            qa_verdict: channel.qa_verdict.take(),
            ..Default::default()
        };

        match channel.completion.take() {
            Some(signal) => {
                report.status = signal.status;
                report.result_path = signal.result_path.or_else(|| channel.report_path.clone());
                report.escalation = signal.escalation;
                report.aar = Aar {
                    summary: signal.summary,
                    approach: last_text.unwrap_or_default(),
                    ..Default::default()
                };
            }
            None if task.assigned_worker_profile == WorkerProfile::Qa && report.qa_verdict.is_some() => {
                // The verdict is the QA profile's terminal output
                report.status = WorkerStatus::Complete;
                report.aar = Aar {
                    summary: "verdict submitted".to_string(),
                    approach: last_text.unwrap_or_default(),
                    ..Default::default()
                };
            }
            None => {
                report.status = WorkerStatus::Failed;
                let reason = if pathological {
                    "worker repeated the same tool call until aborted".to_string()
                } else {
                    "worker ended without calling complete_task".to_string()
                };
                report.aar = Aar {
                    summary: reason,
                    approach: last_text.unwrap_or_default(),
                    ..Default::default()
                };
            }
        }

        // Shell audit trail goes into the after-action record
        let commands = std::mem::take(&mut channel.commands);
        if !commands.is_empty() {
            let audit: Vec<serde_json::Value> = commands
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "command": c.command,
                        "exit_code": c.exit_code,
                        "duration_ms": c.duration_ms,
                    })
                })
                .collect();
            report.aar.extra.insert("commands_run".to_string(), serde_json::json!(audit));
        }

        // Planner contract: must propose subtasks with at least one test task
        if task.assigned_worker_profile == WorkerProfile::Planner && report.status == WorkerStatus::Complete {
            let has_test = report.suggested_tasks.iter().any(|t| t.phase == TaskPhase::Test);
            if report.suggested_tasks.is_empty() || !has_test {
                warn!(task_id = %task.id, "Planner finished without a valid subtask proposal");
                report.status = WorkerStatus::Failed;
                report.aar.summary =
                    "planner must terminate via create_subtasks with at least one test task".to_string();
                report.suggested_tasks.clear();
            }
        }

        // Tester contract: the report file must exist
        if task.assigned_worker_profile == WorkerProfile::Tester
            && report.status == WorkerStatus::Complete
            && channel.report_path.is_none()
        {
            warn!(task_id = %task.id, "Tester finished without writing a report");
            report.status = WorkerStatus::Failed;
            report.aar.summary = "tester completed without writing the result report".to_string();
        }

        // QA contract: exactly one verdict
        if task.assigned_worker_profile == WorkerProfile::Qa && report.qa_verdict.is_none() {
            report.status = WorkerStatus::Failed;
            report.aar.summary = "qa agent did not submit a verdict".to_string();
        }

        report
    }
}

fn build_assistant_message(response: &CompletionResponse) -> Message {
    let mut blocks = Vec::new();

    if let Some(text) = &response.content {
        blocks.push(ContentBlock::text(text));
    }

    for call in &response.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }

    Message::assistant_blocks(blocks)
}

fn build_tool_result_message(results: &[(String, ToolResult)]) -> Message {
    let blocks: Vec<ContentBlock> = results
        .iter()
        .map(|(id, result)| ContentBlock::tool_result(id, &result.content, result.is_error))
        .collect();

    Message::user_blocks(blocks)
}
