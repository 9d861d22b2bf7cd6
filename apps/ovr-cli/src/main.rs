//! # ovr
//!
//! Command-line front-end for Overseer.
//!
//! - `ovr goal create/list/status/start/pause/cancel/replan/world/check`
//! - `ovr action add/list/update/dispatch/results`
//! - `ovr call <tool> [json]`: any registry tool with JSON arguments
//! - `ovr watch`: reap and respawn supervisors on an interval
//!
//! `supervise` and `work` are the roles the binary re-invokes itself in;
//! they are hidden from help.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ovr_orchestrator::{Orchestrator, OrchestratorConfig, SupervisorPhase};

/// Overseer: goal-oriented orchestration of agent workers.
#[derive(Parser)]
#[command(name = "ovr", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, global = true, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage goals and their supervisors.
    Goal {
        #[command(subcommand)]
        command: commands::goal::GoalCommands,
    },
    /// Manage actions under a goal.
    Action {
        #[command(subcommand)]
        command: commands::action::ActionCommands,
    },
    /// Call a registry tool with JSON arguments.
    Call {
        /// Tool name (omit with --list).
        tool: Option<String>,
        /// JSON object of arguments.
        args: Option<String>,
        /// List the available tools.
        #[arg(long)]
        list: bool,
    },
    /// Reap dead supervisors and respawn missing ones until interrupted.
    Watch {
        /// Run a single pass and exit.
        #[arg(long)]
        once: bool,
    },
    /// Run the supervisor loop for one goal.
    #[command(hide = true)]
    Supervise {
        #[arg(long)]
        goal: Uuid,
        #[arg(long, default_value = "execute")]
        phase: SupervisorPhase,
    },
    /// Run one work item from a queue.
    #[command(hide = true)]
    Work {
        #[arg(long)]
        queue: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; role processes have stderr pointed at their log file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ovr_orchestrator=info".parse()?)
                .add_directive("ovr_goal=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = OrchestratorConfig::load(&project_root)?;

    match cli.command {
        Commands::Supervise { goal, phase } => {
            let code = commands::supervise::execute(&config, goal, phase)?;
            std::process::exit(code);
        }
        Commands::Work { queue } => commands::work::execute(&config, &queue),
        Commands::Goal { command } => commands::goal::execute(&command, &front_end(&config)?),
        Commands::Action { command } => commands::action::execute(&command, &front_end(&config)?),
        Commands::Call { tool, args, list } => {
            commands::call::execute(&front_end(&config)?, tool.as_deref(), args.as_deref(), list)
        }
        Commands::Watch { once } => commands::watch::execute(&front_end(&config)?, once),
    }
}

/// Open the orchestrator for a user-facing command, clearing supervisor
/// records left behind by processes that are gone or stale.
fn front_end(config: &OrchestratorConfig) -> anyhow::Result<Orchestrator> {
    let orch = Orchestrator::open(config)?;
    orch.supervisors().check_stale()?;
    Ok(orch)
}
