// planning.rs — Planning engine: readiness, world-state merge, completion.
//
// The free functions are pure and operate on records already in hand.
// `PlanningEngine` wraps them with store access for callers that only
// have ids.
//
// The engine never searches for a plan. Plans arrive from outside as
// action trees; the engine only answers "what may run now" and "are we
// done yet".

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{Action, ActionStatus};
use crate::assertions::{holds, AssertionMap};
use crate::error::GoalError;
use crate::store::StateStore;

/// Appended to result previews that were cut short.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Outcome of a goal-completion check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub complete: bool,
    pub satisfied: usize,
    pub total: usize,
    /// Unsatisfied goal-state keys, in goal-state order.
    pub missing: Vec<String>,
}

/// True when every precondition of `action` holds in `world_state`.
pub fn preconditions_met(action: &Action, world_state: &AssertionMap) -> bool {
    action
        .preconditions
        .iter()
        .all(|name| holds(world_state, name))
}

/// Pending actions (any tree depth) whose preconditions all hold.
///
/// Skipped actions never qualify, whatever the world state says.
pub fn ready_actions<'a>(actions: &'a [Action], world_state: &AssertionMap) -> Vec<&'a Action> {
    actions
        .iter()
        .filter(|a| a.status == ActionStatus::Pending && preconditions_met(a, world_state))
        .collect()
}

/// Merge `incoming` into `world_state`, last write wins per key.
///
/// Each incoming key is removed and re-inserted, so recently asserted
/// facts sort last. Keys not mentioned are untouched.
pub fn merge_assertions(world_state: &mut AssertionMap, incoming: &AssertionMap) {
    for (name, value) in incoming {
        world_state.shift_remove(name);
        world_state.insert(name.clone(), *value);
    }
}

/// Compare `world_state` against `goal_state`.
///
/// An empty goal state is vacuously complete.
pub fn check_progress(goal_state: &AssertionMap, world_state: &AssertionMap) -> Progress {
    let missing: Vec<String> = goal_state
        .keys()
        .filter(|name| !holds(world_state, name))
        .cloned()
        .collect();
    let total = goal_state.len();
    let satisfied = total - missing.len();
    Progress {
        complete: missing.is_empty(),
        satisfied,
        total,
        missing,
    }
}

/// Cut `text` to at most `max_chars` characters, appending
/// [`TRUNCATION_MARKER`] when anything was dropped.
///
/// Returns the preview and whether it was truncated.
pub fn truncate_preview(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (format!("{}{}", &text[..cut], TRUNCATION_MARKER), true),
        None => (text.to_string(), false),
    }
}

/// Results of completed actions whose effects feed `action`'s preconditions.
///
/// Keyed by action id. Each result is truncated to `preview_chars`.
pub fn prerequisite_results(
    action: &Action,
    actions: &[Action],
    preview_chars: usize,
) -> IndexMap<String, String> {
    actions
        .iter()
        .filter(|a| a.id != action.id && a.status == ActionStatus::Completed)
        .filter(|a| a.effects.iter().any(|e| action.preconditions.contains(e)))
        .filter_map(|a| {
            a.result
                .as_deref()
                .map(|r| (a.id.to_string(), truncate_preview(r, preview_chars).0))
        })
        .collect()
}

/// One node of the nested action tree.
#[derive(Debug, Clone, Serialize)]
pub struct ActionNode {
    #[serde(flatten)]
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ActionNode>,
}

/// Nest `actions` under their parents.
///
/// Roots are actions without a parent, or whose parent is not in the
/// slice. Creation order is kept at every level.
pub fn action_tree(actions: &[Action]) -> Vec<ActionNode> {
    fn build(parent: Uuid, actions: &[Action]) -> Vec<ActionNode> {
        actions
            .iter()
            .filter(|a| a.parent_action_id == Some(parent))
            .map(|a| ActionNode {
                action: a.clone(),
                children: build(a.id, actions),
            })
            .collect()
    }

    actions
        .iter()
        .filter(|a| match a.parent_action_id {
            None => true,
            Some(parent) => !actions.iter().any(|p| p.id == parent),
        })
        .map(|a| ActionNode {
            action: a.clone(),
            children: build(a.id, actions),
        })
        .collect()
}

/// A completed action whose declared effects are not all true yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectGap {
    pub action_id: Uuid,
    pub description: String,
    pub missing: Vec<String>,
}

/// Completed actions whose effects were never merged into `world_state`.
pub fn unmerged_effects(actions: &[Action], world_state: &AssertionMap) -> Vec<EffectGap> {
    actions
        .iter()
        .filter(|a| a.status == ActionStatus::Completed)
        .filter_map(|a| {
            let missing: Vec<String> = a
                .effects
                .iter()
                .filter(|e| !holds(world_state, e))
                .cloned()
                .collect();
            (!missing.is_empty()).then(|| EffectGap {
                action_id: a.id,
                description: a.description.clone(),
                missing,
            })
        })
        .collect()
}

/// Store-backed planning operations.
pub struct PlanningEngine<'a> {
    store: &'a dyn StateStore,
}

impl<'a> PlanningEngine<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }

    /// Pending actions of `goal_id` that are ready against `world_state`.
    pub fn list_ready_actions(
        &self,
        goal_id: Uuid,
        world_state: &AssertionMap,
    ) -> Result<Vec<Action>, GoalError> {
        self.store.list_ready(goal_id, world_state)
    }

    /// Merge `assertions` into the goal's persisted world state and return
    /// the merged state.
    pub fn merge_assertions(
        &self,
        goal_id: Uuid,
        assertions: &AssertionMap,
    ) -> Result<AssertionMap, GoalError> {
        let goal = self.store.update_goal(goal_id, &mut |goal| {
            merge_assertions(&mut goal.world_state, assertions);
            goal.touch();
            Ok(())
        })?;
        tracing::debug!(
            goal_id = %goal_id,
            merged = assertions.len(),
            "world state merged"
        );
        Ok(goal.world_state)
    }

    pub fn check_complete(&self, goal_id: Uuid) -> Result<Progress, GoalError> {
        let goal = self.store.require_goal(goal_id)?;
        Ok(check_progress(&goal.goal_state, &goal.world_state))
    }

    /// Skip every Pending action of the goal. Returns how many were skipped.
    pub fn skip_all_pending(&self, goal_id: Uuid) -> Result<usize, GoalError> {
        self.store.require_goal(goal_id)?;
        let skipped = self.store.skip_pending(goal_id)?;
        tracing::info!(goal_id = %goal_id, skipped, "pending actions skipped");
        Ok(skipped)
    }
}
