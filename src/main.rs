//! Conductor CLI entry point

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use conductor::broadcast::Broadcaster;
use conductor::checkpoint::Checkpointer;
use conductor::cli::{Cli, Command};
use conductor::config::Config;
use conductor::control::{ControlPlane, Resolution, ResolveAction};
use conductor::domain::TaskPhase;
use conductor::llm::create_invoker;
use conductor::state::TaskStore;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();
}

fn build_control_plane(config: Config) -> Result<ControlPlane> {
    let config = Arc::new(config);
    let checkpointer = Checkpointer::from_config(&config.storage)?;
    let broadcaster = Broadcaster::with_log_dir(&config.storage.state_dir);
    let invoker = create_invoker(&config.llm).context("Failed to create LLM invoker")?;
    Ok(ControlPlane::new(
        TaskStore::spawn(),
        checkpointer,
        broadcaster,
        invoker,
        config,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        "Conductor started"
    );

    match cli.command {
        Command::Run { objective, workspace } => {
            let plane = build_control_plane(config)?;
            let workspace = workspace.canonicalize().context("Workspace does not exist")?;
            let run_id = plane.create_run(&objective, None, workspace).await?;
            println!("{} {}", "run:".bold(), run_id);

            plane.join_loop(&run_id).await;
            let run = plane.get_run(&run_id).await?;
            print_run(&run);
        }

        Command::Resume { run_id } => {
            let plane = build_control_plane(config)?;
            plane.restart(&run_id).await?;
            plane.join_loop(&run_id).await;
            let run = plane.get_run(&run_id).await?;
            print_run(&run);
        }

        Command::List { limit, offset } => {
            let checkpointer = Checkpointer::from_config(&config.storage)?;
            let page = checkpointer.list(limit, offset)?;
            println!("{} run(s), showing {}:", page.total, page.items.len());
            for summary in page.items {
                println!(
                    "  {}  {}  {}  {}",
                    summary.run_id.bold(),
                    status_colored(&summary.status),
                    summary.updated_at,
                    summary.objective
                );
            }
        }

        Command::Show { run_id } => {
            let checkpointer = Checkpointer::from_config(&config.storage)?;
            let run = checkpointer
                .load_by_run_id(&run_id)?
                .ok_or_else(|| eyre::eyre!("run {} not found", run_id))?;
            print_run(&run);
        }

        Command::Resolve {
            run_id,
            task_id,
            action,
            description,
        } => {
            let plane = build_control_plane(config)?;
            let action = match action.as_str() {
                "retry" => ResolveAction::Retry {
                    modified_description: description,
                    modified_criteria: None,
                },
                "abandon" => ResolveAction::Abandon,
                other => {
                    // spawn_new_task needs structured fields; route users
                    // through retry/abandon here and the API for the rest
                    if other == "spawn_new_task" {
                        ResolveAction::SpawnNewTask {
                            title: format!("Replacement for {}", task_id),
                            description: description.unwrap_or_default(),
                            phase: TaskPhase::Build,
                            profile: None,
                        }
                    } else {
                        eyre::bail!("unknown action '{}'; expected retry|abandon|spawn_new_task", other)
                    }
                }
            };

            plane.resolve(&run_id, Resolution { task_id, action }).await?;
            println!("{}", "resolution applied, run restarting".green());
            plane.join_loop(&run_id).await;
        }
    }

    Ok(())
}

fn status_colored(status: &str) -> colored::ColoredString {
    match status {
        "completed" => status.green(),
        "running" => status.cyan(),
        "failed" | "deadlock" | "cancelled" => status.red(),
        "interrupted" | "paused" => status.yellow(),
        other => other.normal(),
    }
}

fn print_run(run: &conductor::domain::Run) {
    println!(
        "{} {}  [{}]",
        "run:".bold(),
        run.run_id,
        status_colored(&run.status.to_string())
    );
    println!("objective: {}", run.objective);
    println!("tasks:");
    for task in &run.tasks {
        println!(
            "  {}  {}  ({}, {})",
            task.id,
            status_colored(&task.status.to_string()),
            task.phase,
            task.assigned_worker_profile
        );
    }
}
