// goal.rs — Goal subcommands: create, list, status, start, pause, cancel,
// replan, world, check.

use clap::Subcommand;
use uuid::Uuid;

use ovr_goal::{ActionNode, AssertionMap};
use ovr_orchestrator::Orchestrator;

use super::truncate;

#[derive(Subcommand)]
pub enum GoalCommands {
    /// Create a goal in the Planning status.
    Create {
        /// Short goal name (e.g., "Build small app").
        name: String,
        /// What the goal achieves.
        #[arg(long)]
        description: String,
        /// Goal-state assertion: `key` (true) or `key=true|false`. Repeatable.
        #[arg(long = "state", value_name = "ASSERTION", value_parser = parse_assertion)]
        state: Vec<(String, bool)>,
        /// Work queue name (generated when omitted).
        #[arg(long)]
        queue: Option<String>,
    },
    /// List all goals with progress.
    List,
    /// Show a goal with action counts and the action tree.
    Status {
        /// Goal ID.
        id: Uuid,
    },
    /// Spawn the goal's supervisor (Planning or Paused goals).
    Start { id: Uuid },
    /// Kill the supervisor and pause an Active goal.
    Pause { id: Uuid },
    /// Kill any supervisor and mark the goal failed.
    Cancel { id: Uuid },
    /// Skip every pending action so a new plan can be added.
    Replan { id: Uuid },
    /// Show the world state, optionally merging assertions first.
    World {
        id: Uuid,
        /// Assertion to merge: `key` (true) or `key=true|false`. Repeatable.
        #[arg(long = "set", value_name = "ASSERTION", value_parser = parse_assertion)]
        set: Vec<(String, bool)>,
    },
    /// Compare world state against goal state.
    Check {
        id: Uuid,
        /// Also report completed actions whose effects were never merged.
        #[arg(long)]
        audit: bool,
    },
}

pub fn execute(cmd: &GoalCommands, orch: &Orchestrator) -> anyhow::Result<()> {
    match cmd {
        GoalCommands::Create {
            name,
            description,
            state,
            queue,
        } => {
            let goal = orch.create_goal(name, description, to_map(state), queue.clone())?;
            println!("Goal created: {}", goal.id);
            println!("  Name:  {}", goal.name);
            println!("  Queue: {}", goal.queue_name);
            println!("  Goal state: {}", format_assertions(&goal.goal_state));
            Ok(())
        }
        GoalCommands::List => list_goals(orch),
        GoalCommands::Status { id } => show_status(orch, *id),
        GoalCommands::Start { id } => {
            let pid = orch.start_goal(*id)?;
            println!("Supervisor started for goal {} (pid {})", id, pid);
            Ok(())
        }
        GoalCommands::Pause { id } => {
            let goal = orch.pause_goal(*id)?;
            println!("Goal {} is now {}", goal.id, goal.status);
            Ok(())
        }
        GoalCommands::Cancel { id } => {
            let goal = orch.cancel_goal(*id)?;
            println!("Goal {} is now {}", goal.id, goal.status);
            Ok(())
        }
        GoalCommands::Replan { id } => {
            let skipped = orch.replan(*id)?;
            println!("Skipped {} pending action(s).", skipped);
            Ok(())
        }
        GoalCommands::World { id, set } => {
            let world = if set.is_empty() {
                orch.get_goal(*id)?.world_state
            } else {
                orch.update_world_state(*id, &to_map(set))?
            };
            println!("{}", format_assertions(&world));
            Ok(())
        }
        GoalCommands::Check { id, audit } => check(orch, *id, *audit),
    }
}

/// `key` means true; `key=true` / `key=false` are explicit.
pub fn parse_assertion(raw: &str) -> Result<(String, bool), String> {
    let (key, value) = match raw.split_once('=') {
        Some((key, value)) => {
            let value = value
                .trim()
                .parse::<bool>()
                .map_err(|_| format!("'{}' is not true or false", value))?;
            (key.trim(), value)
        }
        None => (raw.trim(), true),
    };
    if key.is_empty() {
        return Err("assertion name is empty".into());
    }
    Ok((key.to_string(), value))
}

fn to_map(pairs: &[(String, bool)]) -> AssertionMap {
    pairs.iter().cloned().collect()
}

fn format_assertions(map: &AssertionMap) -> String {
    if map.is_empty() {
        return "(none)".into();
    }
    map.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn list_goals(orch: &Orchestrator) -> anyhow::Result<()> {
    let goals = orch.list_goals()?;
    if goals.is_empty() {
        println!("No goals found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<28} {:<10} {:<9} {:<10}",
        "ID", "NAME", "STATUS", "PROGRESS", "SUPERVISOR"
    );
    println!("{}", "-".repeat(98));
    for g in &goals {
        let supervisor = match g.supervisor_pid {
            Some(pid) => pid.to_string(),
            None => "-".into(),
        };
        println!(
            "{:<38} {:<28} {:<10} {:<9} {:<10}",
            g.id,
            truncate(&g.name, 26),
            g.status.to_string(),
            format!("{}/{}", g.satisfied, g.total),
            supervisor,
        );
    }
    println!("\n{} goal(s) total.", goals.len());
    Ok(())
}

fn show_status(orch: &Orchestrator, id: Uuid) -> anyhow::Result<()> {
    let report = orch.goal_status(id)?;
    let g = &report.goal;
    println!("Goal:     {}", g.id);
    println!("Name:     {}", g.name);
    println!("Status:   {}", g.status);
    println!("Queue:    {}", g.queue_name);
    println!(
        "Progress: {}/{} assertions",
        report.progress.satisfied, report.progress.total
    );
    if !report.progress.missing.is_empty() {
        println!("Missing:  {}", report.progress.missing.join(", "));
    }
    if let Some(pid) = g.supervisor_pid {
        println!("Supervisor pid: {}", pid);
    }
    if let Some(ref summary) = g.summary {
        println!("Summary:  {}", summary);
    }
    println!("Created:  {}", g.created_at.to_rfc3339());
    println!("Updated:  {}", g.updated_at.to_rfc3339());

    let counts: Vec<String> = report
        .counts
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(status, n)| format!("{} {}", n, status))
        .collect();
    if counts.is_empty() {
        println!("\nNo actions yet.");
        return Ok(());
    }
    println!("\nActions: {}", counts.join(", "));
    for node in &report.tree {
        print_node(node, 1);
    }
    Ok(())
}

fn print_node(node: &ActionNode, depth: usize) {
    let a = &node.action;
    let marker = if a.is_compound { "+" } else { "-" };
    println!(
        "{}{} [{}] {} ({})",
        "  ".repeat(depth),
        marker,
        a.status,
        truncate(&a.description, 60),
        a.id
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

fn check(orch: &Orchestrator, id: Uuid, audit: bool) -> anyhow::Result<()> {
    let progress = orch.check_complete(id)?;
    if progress.complete {
        println!("Complete ({}/{}).", progress.satisfied, progress.total);
    } else {
        println!(
            "Incomplete ({}/{}); missing: {}",
            progress.satisfied,
            progress.total,
            progress.missing.join(", ")
        );
    }
    if audit {
        let gaps = orch.audit_effects(id)?;
        if gaps.is_empty() {
            println!("Every completed action's effects are in the world state.");
        }
        for gap in gaps {
            println!(
                "  {} '{}' never merged: {}",
                gap.action_id,
                truncate(&gap.description, 40),
                gap.missing.join(", ")
            );
        }
    }
    Ok(())
}
