// dispatch.rs — Dispatch controller: hand one primitive action to a worker.
//
// Checks run in a fixed order (existence, compound, pending, capacity)
// so callers get the most specific refusal. Nothing is persisted until
// the worker has started; a failed spawn removes the enqueued item. The
// final Pending → Running mark is conditional: losing that race stops the
// worker and removes its item.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ovr_goal::{prerequisite_results, Action, ActionStatus, AssertionMap, Goal, StateStore};

use crate::config::OrchestratorSettings;
use crate::error::OrchestratorError;
use crate::role_prompts::RolePrompts;
use crate::worker::WorkerLauncher;

/// Handle for a successfully dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub action_id: Uuid,
    pub worker_pid: u32,
    pub work_item_id: String,
}

/// What a worker receives on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkContext {
    /// Goal description (falls back to the goal name).
    pub goal: String,
    pub action: String,
    pub role: String,
    /// System prompt for `role`, built in or overridden per project.
    pub system_prompt: String,
    pub world_state: AssertionMap,
    /// Results of completed actions whose effects this action depends on,
    /// keyed by action id.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub prerequisite_results: IndexMap<String, String>,
}

/// Assemble the execution context for `action`.
pub fn build_context(
    goal: &Goal,
    action: &Action,
    actions: &[Action],
    prompts: &RolePrompts,
    preview_chars: usize,
) -> WorkContext {
    let goal_text = if goal.description.trim().is_empty() {
        goal.name.clone()
    } else {
        goal.description.clone()
    };
    WorkContext {
        goal: goal_text,
        action: action.description.clone(),
        role: action.role.clone(),
        system_prompt: prompts.load(&action.role),
        world_state: goal.world_state.clone(),
        prerequisite_results: prerequisite_results(action, actions, preview_chars),
    }
}

pub struct DispatchController<'a> {
    store: &'a dyn StateStore,
    workers: &'a dyn WorkerLauncher,
    settings: &'a OrchestratorSettings,
    prompts: &'a RolePrompts,
}

impl<'a> DispatchController<'a> {
    pub fn new(
        store: &'a dyn StateStore,
        workers: &'a dyn WorkerLauncher,
        settings: &'a OrchestratorSettings,
        prompts: &'a RolePrompts,
    ) -> Self {
        Self {
            store,
            workers,
            settings,
            prompts,
        }
    }

    pub fn dispatch(&self, action_id: Uuid) -> Result<DispatchOutcome, OrchestratorError> {
        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| OrchestratorError::action_not_found(action_id))?;

        if action.is_compound {
            return Err(OrchestratorError::InvalidState("compound".into()));
        }
        if action.status != ActionStatus::Pending {
            return Err(OrchestratorError::InvalidState("not pending".into()));
        }

        let running = self
            .store
            .count_by_status(action.goal_id, ActionStatus::Running)?;
        let limit = self.settings.max_workers_per_goal;
        if running >= limit {
            return Err(OrchestratorError::CapacityExceeded {
                goal_id: action.goal_id,
                running,
                limit,
            });
        }

        let goal = self
            .store
            .get_goal(action.goal_id)?
            .ok_or_else(|| OrchestratorError::goal_not_found(action.goal_id))?;
        let actions = self.store.list_actions_by_goal(goal.id)?;
        let context = build_context(
            &goal,
            &action,
            &actions,
            self.prompts,
            self.settings.result_preview_chars,
        );
        let context = serde_json::to_value(&context).map_err(ovr_goal::GoalError::from)?;

        let work_item_id = self.workers.enqueue_work_item(
            &goal.queue_name,
            &action.description,
            &context,
            self.settings.retry_budget,
        )?;

        let worker_pid = match self.workers.spawn_worker(&goal.queue_name) {
            Ok(pid) => pid,
            Err(e) => {
                self.remove_orphan(&goal.queue_name, &work_item_id);
                return Err(e);
            }
        };

        if let Err(e) = self.store.mark_dispatched(action_id, &work_item_id) {
            tracing::warn!(
                action_id = %action_id,
                work_item_id = %work_item_id,
                worker_pid,
                "could not mark action running; withdrawing work item: {}",
                e
            );
            if let Err(stop) = self.workers.stop_worker(worker_pid) {
                tracing::warn!(worker_pid, "could not stop worker: {}", stop);
            }
            self.remove_orphan(&goal.queue_name, &work_item_id);
            return Err(e.into());
        }
        tracing::info!(
            goal_id = %goal.id,
            action_id = %action_id,
            work_item_id = %work_item_id,
            worker_pid,
            "action dispatched"
        );

        Ok(DispatchOutcome {
            action_id,
            worker_pid,
            work_item_id,
        })
    }

    fn remove_orphan(&self, queue: &str, work_item_id: &str) {
        if let Err(cleanup) = self.workers.remove_work_item(queue, work_item_id) {
            tracing::warn!(
                work_item_id = %work_item_id,
                "could not remove orphaned work item: {}",
                cleanup
            );
        }
    }
}
