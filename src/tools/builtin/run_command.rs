//! bash tool - audited shell execution inside the worktree
//!
//! Every invocation is recorded on the side channel (command, exit code,
//! duration) so the after-action report can account for what actually ran.
//! Commands get their own process group; when the timeout fires the whole
//! group is killed, so nothing a worker started outlives the tool call.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tools::context::CommandRecord;
use crate::tools::{Tool, ToolContext, ToolError, ToolResult};

/// Upper bound kept from each of stdout and stderr. Build and test output
/// buries the signal at the end, so truncation drops the head, not the tail.
const STREAM_CAP: usize = 12_000;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Run a shell command in the worktree, with auditing and group kill
pub struct RunCommandTool;

struct CommandOutcome {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    duration: Duration,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn description(&self) -> &'static str {
        "Run a shell command from the worktree root (builds, tests, git). \
         Output is captured; long output keeps its tail."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command line"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Seconds before the command and its children are killed (default: 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let command = match input["command"].as_str().filter(|c| !c.trim().is_empty()) {
            Some(c) => c.to_string(),
            None => return ToolResult::error("command is required"),
        };
        let timeout = Duration::from_secs(input["timeout_secs"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS));

        debug!(task_id = %ctx.task_id, %command, ?timeout, "RunCommandTool::execute: spawning");
        let outcome = match run_in_group(&command, ctx, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Timeouts are audited too; an unrecorded kill would make
                // the command history lie
                if matches!(e, ToolError::CommandTimeout { .. }) {
                    ctx.side_channel.lock().await.commands.push(CommandRecord {
                        command,
                        exit_code: None,
                        duration_ms: timeout.as_millis() as u64,
                    });
                }
                return ToolResult::error(e.to_string());
            }
        };

        ctx.side_channel.lock().await.commands.push(CommandRecord {
            command,
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration.as_millis() as u64,
        });

        let body = render_outcome(&outcome);
        if outcome.exit_code == Some(0) {
            ToolResult::success(body)
        } else {
            ToolResult::error(body)
        }
    }
}

/// Spawn the command in its own process group and wait with a deadline
async fn run_in_group(command: &str, ctx: &ToolContext, timeout: Duration) -> Result<CommandOutcome, ToolError> {
    let started = Instant::now();

    let mut builder = tokio::process::Command::new("sh");
    builder
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.worktree)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    builder.process_group(0);

    let child = builder.spawn().map_err(ToolError::Io)?;
    #[cfg(unix)]
    let group_pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        }),
        Ok(Err(e)) => Err(ToolError::Io(e)),
        Err(_) => {
            debug!(%command, "RunCommandTool: deadline hit, killing process group");
            #[cfg(unix)]
            if let Some(pid) = group_pid {
                let _ = nix::sys::signal::killpg(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
            Err(ToolError::CommandTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

/// Headline plus labelled streams, each tail-capped independently
fn render_outcome(outcome: &CommandOutcome) -> String {
    let mut body = match outcome.exit_code {
        Some(code) => format!("exit {} in {}ms", code, outcome.duration.as_millis()),
        None => format!("killed by signal after {}ms", outcome.duration.as_millis()),
    };

    if !outcome.stdout.trim().is_empty() {
        body.push_str("\n--- stdout ---\n");
        body.push_str(&tail(&outcome.stdout, STREAM_CAP));
    }
    if !outcome.stderr.trim().is_empty() {
        body.push_str("\n--- stderr ---\n");
        body.push_str(&tail(&outcome.stderr, STREAM_CAP));
    }
    if outcome.stdout.trim().is_empty() && outcome.stderr.trim().is_empty() {
        body.push_str("\n(no output)");
    }

    body
}

/// Keep the last `cap` characters, noting how much was dropped
fn tail(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.trim_end().to_string();
    }
    // Cut on a char boundary at roughly cap from the end
    let mut start = s.len() - cap;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("[{} chars omitted]\n...{}", start, s[start..].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx(temp: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(temp.path().to_path_buf(), "t-1".to_string())
    }

    #[tokio::test]
    async fn test_success_reports_exit_zero() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let result = RunCommandTool
            .execute(serde_json::json!({"command": "printf hello"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(result.content.starts_with("exit 0"));
        assert!(result.content.contains("hello"));
    }

    #[tokio::test]
    async fn test_runs_from_worktree_root() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "").unwrap();
        let ctx = ctx(&temp);

        let result = RunCommandTool.execute(serde_json::json!({"command": "ls"}), &ctx).await;
        assert!(result.content.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error_with_streams() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let result = RunCommandTool
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}), &ctx)
            .await;

        assert!(result.is_error);
        assert!(result.content.starts_with("exit 3"));
        assert!(result.content.contains("--- stderr ---"));
        assert!(result.content.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_audits() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let started = Instant::now();
        let result = RunCommandTool
            .execute(serde_json::json!({"command": "sleep 30", "timeout_secs": 1}), &ctx)
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));

        // The kill still shows up in the audit trail
        let channel = ctx.side_channel.lock().await;
        assert_eq!(channel.commands.len(), 1);
        assert_eq!(channel.commands[0].exit_code, None);
    }

    #[tokio::test]
    async fn test_commands_are_audited_in_order() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        RunCommandTool.execute(serde_json::json!({"command": "true"}), &ctx).await;
        RunCommandTool.execute(serde_json::json!({"command": "false"}), &ctx).await;

        let channel = ctx.side_channel.lock().await;
        assert_eq!(channel.commands.len(), 2);
        assert_eq!(channel.commands[0].command, "true");
        assert_eq!(channel.commands[0].exit_code, Some(0));
        assert_eq!(channel.commands[1].exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_blank_command_rejected() {
        let temp = tempdir().unwrap();
        let ctx = ctx(&temp);

        let result = RunCommandTool.execute(serde_json::json!({"command": "  "}), &ctx).await;
        assert!(result.is_error);
    }

    #[test]
    fn test_tail_keeps_the_end() {
        let long: String = (0..1000).map(|i| format!("line {}\n", i)).collect();
        let tailed = tail(&long, 100);
        assert!(tailed.contains("line 999"));
        assert!(!tailed.contains("line 1\n"));
        assert!(tailed.contains("chars omitted"));
    }

    #[test]
    fn test_tail_short_input_untouched() {
        assert_eq!(tail("short\n", 100), "short");
    }

    #[test]
    fn test_render_no_output() {
        let outcome = CommandOutcome {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(5),
        };
        assert!(render_outcome(&outcome).contains("(no output)"));
    }
}
