//! Worker profiles: tool selection and prompt policy
//!
//! A profile is a filter over the tool registry plus a system-prompt
//! policy. The registry itself stays uniform; what a worker can do is
//! decided entirely here.

use handlebars::Handlebars;
use serde_json::json;

use crate::domain::{Task, WorkerProfile};

/// Tool names available to a profile
pub fn tools_for(profile: WorkerProfile) -> Vec<String> {
    let names: &[&str] = match profile {
        WorkerProfile::Planner => &[
            "read",
            "list",
            "glob",
            "grep",
            "file_exists",
            "create_subtasks",
            "post_insight",
            "complete_task",
        ],
        WorkerProfile::Coder => &[
            "read",
            "write",
            "edit",
            "list",
            "glob",
            "grep",
            "file_exists",
            "bash",
            "post_insight",
            "complete_task",
        ],
        WorkerProfile::Tester => &[
            "read",
            "write",
            "edit",
            "list",
            "glob",
            "grep",
            "file_exists",
            "bash",
            "write_report",
            "post_insight",
            "complete_task",
        ],
        WorkerProfile::Researcher => &["read", "list", "glob", "grep", "file_exists", "post_insight", "complete_task"],
        WorkerProfile::Writer => &[
            "read",
            "write",
            "edit",
            "list",
            "glob",
            "file_exists",
            "post_insight",
            "complete_task",
        ],
        WorkerProfile::Merger => &[
            "read",
            "write",
            "edit",
            "list",
            "glob",
            "grep",
            "file_exists",
            "bash",
            "complete_task",
        ],
        // Read-only by contract
        WorkerProfile::Qa => &["read", "list", "glob", "grep", "file_exists", "submit_verdict", "complete_task"],
    };
    names.iter().map(|n| n.to_string()).collect()
}

const BASE_TEMPLATE: &str = "\
You are a {{profile}} agent working on one task inside an isolated git worktree.

Working directory: {{worktree}}
Task: {{title}}
{{#if component}}Component: {{component}}{{/if}}

{{description}}

{{#if acceptance_criteria}}Acceptance criteria:
{{#each acceptance_criteria}}- {{this}}
{{/each}}{{/if}}
{{policy}}

Work only inside the worktree. When you are done, call complete_task.";

/// Profile-specific policy paragraph appended to the system prompt
fn policy_for(profile: WorkerProfile) -> &'static str {
    match profile {
        WorkerProfile::Planner => {
            "Decompose this plan into concrete build and test tasks using the \
             create_subtasks tool. Every plan must include at least one test task. \
             Reference dependencies between your proposed tasks by title; use \
             dependency_queries for work you expect other planners to produce. \
             Call create_subtasks exactly once, then complete_task."
        }
        WorkerProfile::Coder => {
            "Implement the task. Check file_exists before writing to any path you \
             have not read; existing files must be read before they are changed. \
             Run the project's build or tests with bash to verify your work. Do not \
             install packages outside the workspace's own environment."
        }
        WorkerProfile::Tester => {
            "Write and run the tests this task describes. You must write a result \
             report with write_report before completing; a missing report fails the \
             task. Record each failing test and what it shows."
        }
        WorkerProfile::Researcher => {
            "Investigate and summarize. Post what you learn with post_insight; your \
             completion summary should answer the task's question."
        }
        WorkerProfile::Writer => {
            "Produce the document or content the task describes. Keep it in the \
             worktree at a sensible path and name that path in result_path."
        }
        WorkerProfile::Merger => {
            "The worktree is mid-rebase with conflict markers. Resolve every \
             conflicted file by reconciling BOTH sides - never just pick one. Then \
             stage the files and continue the rebase with bash \
             (git add -A && git rebase --continue). Complete only once the rebase \
             has finished cleanly."
        }
        WorkerProfile::Qa => {
            "Review the completed work against the task's acceptance criteria using \
             read-only tools. Submit exactly one verdict with submit_verdict: PASS \
             only if the criteria are met. When reviewing test results, judge \
             whether each failure blames the code or the test itself."
        }
    }
}

/// Render the system prompt for a task
pub fn system_prompt(task: &Task, worktree: &str) -> String {
    let handlebars = Handlebars::new();
    handlebars
        .render_template(
            BASE_TEMPLATE,
            &json!({
                "profile": task.assigned_worker_profile.to_string(),
                "worktree": worktree,
                "title": task.title,
                "component": task.component,
                "description": task.description,
                "acceptance_criteria": task.acceptance_criteria,
                "policy": policy_for(task.assigned_worker_profile),
            }),
        )
        .unwrap_or_else(|_| format!("You are a {} agent. Task: {}", task.assigned_worker_profile, task.title))
}
