//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conductor - multi-agent workflow orchestration engine
#[derive(Parser)]
#[command(
    name = "cond",
    about = "Orchestrates DAGs of LLM worker agents in isolated git worktrees",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Create a run for an objective and drive it to termination
    Run {
        /// The natural-language objective
        objective: String,

        /// Workspace directory (the trunk checkout)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Resume an interrupted, paused, or deadlocked run from its checkpoint
    Resume {
        /// Run ID
        run_id: String,
    },

    /// List known runs
    List {
        /// Maximum rows
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Offset into the listing
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Show one run's tasks and status
    Show {
        /// Run ID
        run_id: String,
    },

    /// Resolve a task that is waiting for a human decision
    Resolve {
        /// Run ID
        run_id: String,

        /// Task ID
        task_id: String,

        /// Action: retry | abandon
        #[arg(short, long, default_value = "retry")]
        action: String,

        /// Replacement description for retry
        #[arg(short, long)]
        description: Option<String>,
    },
}
