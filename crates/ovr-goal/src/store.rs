// store.rs — StateStore: durable storage for Goal and Action records.
//
// The trait has a small set of required primitives (insert, get, list,
// and an atomic read-modify-write per record). Everything else the
// orchestrator needs is a provided method built on those, so a backend
// only has to get the primitives right.
//
// `JsonStateStore` keeps one JSON file per record:
//   <root>/goals/<goal_id>.json
//   <root>/actions/<action_id>.json
// Read-modify-write cycles hold an exclusive flock on `<root>/.lock` so
// the front-end and every supervisor process can share one store.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::action::{Action, ActionStatus};
use crate::assertions::AssertionMap;
use crate::error::GoalError;
use crate::goal::{Goal, GoalStatus};
use crate::lock::FileLock;
use crate::planning;

/// Callback applied to a goal inside [`StateStore::update_goal`].
pub type GoalMutation<'a> = &'a mut dyn FnMut(&mut Goal) -> Result<(), GoalError>;

/// Callback applied to an action inside [`StateStore::update_action`].
pub type ActionMutation<'a> = &'a mut dyn FnMut(&mut Action) -> Result<(), GoalError>;

/// Durable keyed storage for goals and actions.
///
/// `update_goal` / `update_action` must apply the mutation atomically with
/// respect to other writers of the same store. If the mutation returns an
/// error nothing is persisted.
pub trait StateStore: Send + Sync {
    fn insert_goal(&self, goal: &Goal) -> Result<(), GoalError>;
    fn get_goal(&self, id: Uuid) -> Result<Option<Goal>, GoalError>;
    /// All goals, oldest first.
    fn list_goals(&self) -> Result<Vec<Goal>, GoalError>;
    fn update_goal(&self, id: Uuid, mutate: GoalMutation<'_>) -> Result<Goal, GoalError>;

    fn insert_action(&self, action: &Action) -> Result<(), GoalError>;
    fn get_action(&self, id: Uuid) -> Result<Option<Action>, GoalError>;
    /// Every action of a goal at any tree depth, in creation order.
    fn list_actions_by_goal(&self, goal_id: Uuid) -> Result<Vec<Action>, GoalError>;
    fn update_action(&self, id: Uuid, mutate: ActionMutation<'_>) -> Result<Action, GoalError>;

    // ── Provided operations ──────────────────────────────────────

    fn require_goal(&self, id: Uuid) -> Result<Goal, GoalError> {
        self.get_goal(id)?.ok_or(GoalError::GoalNotFound(id))
    }

    fn require_action(&self, id: Uuid) -> Result<Action, GoalError> {
        self.get_action(id)?.ok_or(GoalError::ActionNotFound(id))
    }

    fn list_goals_by_status(&self, status: GoalStatus) -> Result<Vec<Goal>, GoalError> {
        Ok(self
            .list_goals()?
            .into_iter()
            .filter(|g| g.status == status)
            .collect())
    }

    fn update_goal_status(&self, id: Uuid, status: GoalStatus) -> Result<Goal, GoalError> {
        self.update_goal(id, &mut |goal| goal.transition(status))
    }

    /// Replace the whole world state.
    fn update_world_state(&self, id: Uuid, world_state: AssertionMap) -> Result<Goal, GoalError> {
        self.update_goal(id, &mut |goal| {
            goal.world_state = world_state.clone();
            goal.touch();
            Ok(())
        })
    }

    fn update_summary(&self, id: Uuid, summary: &str) -> Result<Goal, GoalError> {
        self.update_goal(id, &mut |goal| {
            goal.summary = Some(summary.to_string());
            goal.touch();
            Ok(())
        })
    }

    fn update_supervisor(
        &self,
        id: Uuid,
        pid: u32,
        started_at: DateTime<Utc>,
    ) -> Result<Goal, GoalError> {
        self.update_goal(id, &mut |goal| {
            goal.set_supervisor(pid, started_at);
            Ok(())
        })
    }

    fn clear_supervisor(&self, id: Uuid) -> Result<Goal, GoalError> {
        self.update_goal(id, &mut |goal| {
            goal.clear_supervisor();
            Ok(())
        })
    }

    fn update_action_status(
        &self,
        id: Uuid,
        status: ActionStatus,
        result: Option<String>,
    ) -> Result<Action, GoalError> {
        self.update_action(id, &mut |action| action.transition(status, result.clone()))
    }

    /// Mark a dispatched action Running and remember its work item.
    ///
    /// Only a Pending action can be marked; the check and the write happen
    /// under the same update, so a second dispatch of the same action fails
    /// with [`GoalError::NotPending`] and leaves the first work item in place.
    fn mark_dispatched(&self, id: Uuid, work_item_id: &str) -> Result<Action, GoalError> {
        self.update_action(id, &mut |action| {
            if action.status != ActionStatus::Pending {
                return Err(GoalError::NotPending {
                    id: action.id,
                    status: action.status.to_string(),
                });
            }
            action.transition(ActionStatus::Running, None)?;
            action.work_item_id = Some(work_item_id.to_string());
            Ok(())
        })
    }

    /// Direct children of a compound action, in creation order.
    fn list_children(&self, parent_id: Uuid) -> Result<Vec<Action>, GoalError> {
        let parent = self.require_action(parent_id)?;
        Ok(self
            .list_actions_by_goal(parent.goal_id)?
            .into_iter()
            .filter(|a| a.parent_action_id == Some(parent_id))
            .collect())
    }

    fn list_actions_by_status(
        &self,
        goal_id: Uuid,
        status: ActionStatus,
    ) -> Result<Vec<Action>, GoalError> {
        Ok(self
            .list_actions_by_goal(goal_id)?
            .into_iter()
            .filter(|a| a.status == status)
            .collect())
    }

    fn list_running(&self, goal_id: Uuid) -> Result<Vec<Action>, GoalError> {
        self.list_actions_by_status(goal_id, ActionStatus::Running)
    }

    fn count_by_status(&self, goal_id: Uuid, status: ActionStatus) -> Result<usize, GoalError> {
        Ok(self.list_actions_by_status(goal_id, status)?.len())
    }

    /// Pending actions whose preconditions all hold in `world_state`.
    fn list_ready(&self, goal_id: Uuid, world_state: &AssertionMap) -> Result<Vec<Action>, GoalError> {
        let actions = self.list_actions_by_goal(goal_id)?;
        Ok(planning::ready_actions(&actions, world_state)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Move every Pending action of the goal to Skipped. Returns how many.
    fn skip_pending(&self, goal_id: Uuid) -> Result<usize, GoalError> {
        let mut skipped = 0;
        for action in self.list_actions_by_status(goal_id, ActionStatus::Pending)? {
            // Re-check under the write: a dispatcher may have moved it on.
            let mut changed = false;
            self.update_action(action.id, &mut |a| {
                if a.status == ActionStatus::Pending {
                    a.transition(ActionStatus::Skipped, None)?;
                    changed = true;
                }
                Ok(())
            })?;
            if changed {
                skipped += 1;
            }
        }
        Ok(skipped)
    }
}

/// File-backed [`StateStore`], one JSON file per record.
pub struct JsonStateStore {
    root: PathBuf,
    goals_dir: PathBuf,
    actions_dir: PathBuf,
}

impl JsonStateStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, GoalError> {
        let root = root.as_ref().to_path_buf();
        let goals_dir = root.join("goals");
        let actions_dir = root.join("actions");
        for dir in [&root, &goals_dir, &actions_dir] {
            fs::create_dir_all(dir).map_err(|source| GoalError::io(dir.display(), source))?;
        }
        Ok(Self {
            root,
            goals_dir,
            actions_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn goal_file(&self, id: Uuid) -> PathBuf {
        self.goals_dir.join(format!("{}.json", id))
    }

    fn action_file(&self, id: Uuid) -> PathBuf {
        self.actions_dir.join(format!("{}.json", id))
    }

    fn lock(&self) -> Result<FileLock, GoalError> {
        FileLock::acquire(&self.root.join(".lock"))
    }
}

impl StateStore for JsonStateStore {
    fn insert_goal(&self, goal: &Goal) -> Result<(), GoalError> {
        let _lock = self.lock()?;
        write_record(&self.goal_file(goal.id), goal)
    }

    fn get_goal(&self, id: Uuid) -> Result<Option<Goal>, GoalError> {
        read_record(&self.goal_file(id))
    }

    fn list_goals(&self) -> Result<Vec<Goal>, GoalError> {
        let mut goals: Vec<Goal> = read_dir_records(&self.goals_dir)?;
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(goals)
    }

    fn update_goal(&self, id: Uuid, mutate: GoalMutation<'_>) -> Result<Goal, GoalError> {
        let _lock = self.lock()?;
        let path = self.goal_file(id);
        let mut goal: Goal = read_record(&path)?.ok_or(GoalError::GoalNotFound(id))?;
        mutate(&mut goal)?;
        write_record(&path, &goal)?;
        Ok(goal)
    }

    fn insert_action(&self, action: &Action) -> Result<(), GoalError> {
        let _lock = self.lock()?;
        write_record(&self.action_file(action.id), action)
    }

    fn get_action(&self, id: Uuid) -> Result<Option<Action>, GoalError> {
        read_record(&self.action_file(id))
    }

    fn list_actions_by_goal(&self, goal_id: Uuid) -> Result<Vec<Action>, GoalError> {
        let mut actions: Vec<Action> = read_dir_records::<Action>(&self.actions_dir)?
            .into_iter()
            .filter(|a| a.goal_id == goal_id)
            .collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(actions)
    }

    fn update_action(&self, id: Uuid, mutate: ActionMutation<'_>) -> Result<Action, GoalError> {
        let _lock = self.lock()?;
        let path = self.action_file(id);
        let mut action: Action = read_record(&path)?.ok_or(GoalError::ActionNotFound(id))?;
        mutate(&mut action)?;
        write_record(&path, &action)?;
        Ok(action)
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, GoalError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(GoalError::io(path.display(), source)),
    };
    Ok(Some(serde_json::from_str(&json)?))
}

/// Write via a temp file + rename so readers never see a half-written record.
fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<(), GoalError> {
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|source| GoalError::io(tmp.display(), source))?;
    fs::rename(&tmp, path).map_err(|source| GoalError::io(path.display(), source))?;
    Ok(())
}

fn read_dir_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, GoalError> {
    let entries = fs::read_dir(dir).map_err(|source| GoalError::io(dir.display(), source))?;
    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| GoalError::io(dir.display(), source))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            match read_record::<T>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                }
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionSpec;
    use crate::assertions::{assertion_map, assertion_set};
    use tempfile::tempdir;

    fn goal() -> Goal {
        Goal::new("Build", "Build the thing", assertion_map([("built", true)]), None)
    }

    fn action(goal_id: Uuid, description: &str) -> Action {
        Action::new(
            goal_id,
            ActionSpec {
                description: description.into(),
                effects: assertion_set(["built"]),
                ..ActionSpec::default()
            },
        )
    }

    #[test]
    fn goal_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let g = goal();
        store.insert_goal(&g).unwrap();

        let loaded = store.require_goal(g.id).unwrap();
        assert_eq!(loaded.name, "Build");
        assert_eq!(loaded.queue_name, g.queue_name);
        assert!(store.get_goal(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempdir().unwrap();
        let g = goal();
        {
            let store = JsonStateStore::new(dir.path()).unwrap();
            store.insert_goal(&g).unwrap();
            store
                .update_world_state(g.id, assertion_map([("built", true)]))
                .unwrap();
        }
        let reopened = JsonStateStore::new(dir.path()).unwrap();
        let loaded = reopened.require_goal(g.id).unwrap();
        assert_eq!(loaded.world_state.get("built"), Some(&true));
    }

    #[test]
    fn failed_mutation_persists_nothing() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let g = goal();
        store.insert_goal(&g).unwrap();

        // Planning → Completed is not allowed.
        let err = store.update_goal_status(g.id, GoalStatus::Completed);
        assert!(matches!(err, Err(GoalError::InvalidTransition { .. })));
        assert_eq!(store.require_goal(g.id).unwrap().status, GoalStatus::Planning);
    }

    #[test]
    fn update_missing_goal_is_not_found() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.update_summary(id, "x"),
            Err(GoalError::GoalNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn actions_listed_per_goal_in_creation_order() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let a = goal();
        let b = goal();
        store.insert_goal(&a).unwrap();
        store.insert_goal(&b).unwrap();

        for name in ["first", "second", "third"] {
            store.insert_action(&action(a.id, name)).unwrap();
        }
        store.insert_action(&action(b.id, "other goal")).unwrap();

        let listed: Vec<String> = store
            .list_actions_by_goal(a.id)
            .unwrap()
            .into_iter()
            .map(|x| x.description)
            .collect();
        assert_eq!(listed, vec!["first", "second", "third"]);
        assert_eq!(store.list_actions_by_goal(b.id).unwrap().len(), 1);
    }

    #[test]
    fn children_running_and_counts() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let g = goal();
        store.insert_goal(&g).unwrap();

        let parent = Action::new(
            g.id,
            ActionSpec {
                description: "parent".into(),
                is_compound: true,
                ..ActionSpec::default()
            },
        );
        store.insert_action(&parent).unwrap();
        let mut child = action(g.id, "child");
        child.parent_action_id = Some(parent.id);
        store.insert_action(&child).unwrap();

        assert_eq!(store.list_children(parent.id).unwrap().len(), 1);
        store.mark_dispatched(child.id, "wi-1").unwrap();

        let running = store.list_running(g.id).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].work_item_id.as_deref(), Some("wi-1"));
        assert_eq!(store.count_by_status(g.id, ActionStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn second_dispatch_mark_fails_and_keeps_first_work_item() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let g = goal();
        store.insert_goal(&g).unwrap();
        let a = action(g.id, "once");
        store.insert_action(&a).unwrap();

        store.mark_dispatched(a.id, "wi-first").unwrap();
        let err = store.mark_dispatched(a.id, "wi-second").unwrap_err();
        assert!(matches!(err, GoalError::NotPending { id, .. } if id == a.id));

        let stored = store.require_action(a.id).unwrap();
        assert_eq!(stored.status, ActionStatus::Running);
        assert_eq!(stored.work_item_id.as_deref(), Some("wi-first"));
    }

    #[test]
    fn skipped_action_cannot_be_marked_dispatched() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let g = goal();
        store.insert_goal(&g).unwrap();
        let a = action(g.id, "skipped");
        store.insert_action(&a).unwrap();
        store.skip_pending(g.id).unwrap();

        assert!(matches!(
            store.mark_dispatched(a.id, "wi"),
            Err(GoalError::NotPending { .. })
        ));
        assert!(store.require_action(a.id).unwrap().work_item_id.is_none());
    }

    #[test]
    fn skip_pending_leaves_running_actions_alone() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let g = goal();
        store.insert_goal(&g).unwrap();

        let running = action(g.id, "running");
        store.insert_action(&running).unwrap();
        store.mark_dispatched(running.id, "wi").unwrap();
        for name in ["p1", "p2"] {
            store.insert_action(&action(g.id, name)).unwrap();
        }

        assert_eq!(store.skip_pending(g.id).unwrap(), 2);
        assert_eq!(store.count_by_status(g.id, ActionStatus::Skipped).unwrap(), 2);
        assert_eq!(store.count_by_status(g.id, ActionStatus::Running).unwrap(), 1);
        assert_eq!(store.skip_pending(g.id).unwrap(), 0);
    }

    #[test]
    fn unreadable_files_are_skipped_when_listing() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        store.insert_goal(&goal()).unwrap();
        fs::write(dir.path().join("goals").join("junk.json"), "not json").unwrap();
        assert_eq!(store.list_goals().unwrap().len(), 1);
    }
}
