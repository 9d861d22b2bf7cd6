// memory.rs — In-process StateStore for tests and embedding.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::action::Action;
use crate::error::GoalError;
use crate::goal::Goal;
use crate::store::{ActionMutation, GoalMutation, StateStore};

#[derive(Default)]
struct Tables {
    goals: HashMap<Uuid, Goal>,
    actions: HashMap<Uuid, Action>,
    // Insertion sequence; created_at can tie within one clock tick.
    goal_order: Vec<Uuid>,
    action_order: Vec<Uuid>,
}

/// A [`StateStore`] held entirely in memory behind one mutex.
#[derive(Default)]
pub struct MemoryStateStore {
    tables: Mutex<Tables>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock cannot leave a half-applied
        // record: mutations run on a copy.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn insert_goal(&self, goal: &Goal) -> Result<(), GoalError> {
        let mut t = self.tables();
        if t.goals.insert(goal.id, goal.clone()).is_none() {
            t.goal_order.push(goal.id);
        }
        Ok(())
    }

    fn get_goal(&self, id: Uuid) -> Result<Option<Goal>, GoalError> {
        Ok(self.tables().goals.get(&id).cloned())
    }

    fn list_goals(&self) -> Result<Vec<Goal>, GoalError> {
        let t = self.tables();
        Ok(t
            .goal_order
            .iter()
            .filter_map(|id| t.goals.get(id).cloned())
            .collect())
    }

    fn update_goal(&self, id: Uuid, mutate: GoalMutation<'_>) -> Result<Goal, GoalError> {
        let mut t = self.tables();
        let mut goal = t.goals.get(&id).cloned().ok_or(GoalError::GoalNotFound(id))?;
        mutate(&mut goal)?;
        t.goals.insert(id, goal.clone());
        Ok(goal)
    }

    fn insert_action(&self, action: &Action) -> Result<(), GoalError> {
        let mut t = self.tables();
        if t.actions.insert(action.id, action.clone()).is_none() {
            t.action_order.push(action.id);
        }
        Ok(())
    }

    fn get_action(&self, id: Uuid) -> Result<Option<Action>, GoalError> {
        Ok(self.tables().actions.get(&id).cloned())
    }

    fn list_actions_by_goal(&self, goal_id: Uuid) -> Result<Vec<Action>, GoalError> {
        let t = self.tables();
        Ok(t
            .action_order
            .iter()
            .filter_map(|id| t.actions.get(id))
            .filter(|a| a.goal_id == goal_id)
            .cloned()
            .collect())
    }

    fn update_action(&self, id: Uuid, mutate: ActionMutation<'_>) -> Result<Action, GoalError> {
        let mut t = self.tables();
        let mut action = t
            .actions
            .get(&id)
            .cloned()
            .ok_or(GoalError::ActionNotFound(id))?;
        mutate(&mut action)?;
        t.actions.insert(id, action.clone());
        Ok(action)
    }
}
