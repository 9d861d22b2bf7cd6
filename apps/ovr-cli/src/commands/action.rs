// action.rs — Action subcommands: add, list, update, dispatch, results.

use clap::Subcommand;
use uuid::Uuid;

use ovr_goal::{assertion_set, ActionSpec, ActionStatus};
use ovr_orchestrator::Orchestrator;

use super::truncate;

#[derive(Subcommand)]
pub enum ActionCommands {
    /// Add one action to a goal.
    Add {
        /// Goal ID.
        goal: Uuid,
        /// What the action does.
        description: String,
        /// Assertion that must hold before the action is ready. Repeatable.
        #[arg(long = "pre")]
        preconditions: Vec<String>,
        /// Assertion the action makes true. Repeatable.
        #[arg(long = "effect")]
        effects: Vec<String>,
        /// Parent compound action.
        #[arg(long)]
        parent: Option<Uuid>,
        /// Worker role (defaults to "implementation").
        #[arg(long)]
        role: Option<String>,
        /// Mark as compound (decomposed into children, never dispatched).
        #[arg(long)]
        compound: bool,
    },
    /// List a goal's actions.
    List {
        goal: Uuid,
        /// Filter by status (pending, running, completed, failed, skipped).
        #[arg(long)]
        status: Option<ActionStatus>,
        /// Only children of this action.
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// Set an action's status and optional result.
    Update {
        id: Uuid,
        status: ActionStatus,
        #[arg(long)]
        result: Option<String>,
    },
    /// Hand a ready primitive action to a worker.
    Dispatch { id: Uuid },
    /// Show results of a goal's completed actions.
    Results {
        goal: Uuid,
        /// Restrict to these action IDs.
        ids: Vec<Uuid>,
    },
}

pub fn execute(cmd: &ActionCommands, orch: &Orchestrator) -> anyhow::Result<()> {
    match cmd {
        ActionCommands::Add {
            goal,
            description,
            preconditions,
            effects,
            parent,
            role,
            compound,
        } => {
            let spec = ActionSpec {
                description: description.clone(),
                parent_action_id: *parent,
                role: role.clone(),
                is_compound: *compound,
                preconditions: assertion_set(preconditions.iter().map(String::as_str)),
                effects: assertion_set(effects.iter().map(String::as_str)),
            };
            let batch = orch.create_actions(*goal, vec![spec])?;
            match batch.action_ids.first() {
                Some(id) => println!("Action created: {}", id),
                None => anyhow::bail!("action rejected: {}", batch.errors.join("; ")),
            }
            Ok(())
        }
        ActionCommands::List {
            goal,
            status,
            parent,
        } => {
            let actions = orch.list_actions(*goal, *status, *parent)?;
            if actions.is_empty() {
                println!("No actions found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<16} {:<40}",
                "ID", "STATUS", "ROLE", "DESCRIPTION"
            );
            println!("{}", "-".repeat(106));
            for a in &actions {
                let description = if a.is_compound {
                    format!("[compound] {}", a.description)
                } else {
                    a.description.clone()
                };
                println!(
                    "{:<38} {:<10} {:<16} {:<40}",
                    a.id,
                    a.status.to_string(),
                    truncate(&a.role, 14),
                    truncate(&description, 40),
                );
            }
            println!("\n{} action(s).", actions.len());
            Ok(())
        }
        ActionCommands::Update { id, status, result } => {
            let action = orch.update_action(*id, *status, result.clone())?;
            println!("Action {} is now {}", action.id, action.status);
            Ok(())
        }
        ActionCommands::Dispatch { id } => {
            let outcome = orch.dispatch_action(*id)?;
            println!(
                "Dispatched {} as work item {} (worker pid {})",
                outcome.action_id, outcome.work_item_id, outcome.worker_pid
            );
            Ok(())
        }
        ActionCommands::Results { goal, ids } => {
            let filter = if ids.is_empty() { None } else { Some(ids.as_slice()) };
            let results = orch.get_action_results(*goal, filter)?;
            if results.is_empty() {
                println!("No completed actions with results.");
            }
            for r in &results {
                println!("== {} ({}) [{}]", r.description, r.action_id, r.role);
                println!("{}", r.result);
                println!();
            }
            Ok(())
        }
    }
}
