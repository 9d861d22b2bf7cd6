// api.rs — Orchestrator: the goal/action/supervisor operation set.
//
// Each operation is a thin composition of the planning engine, the
// dispatch controller, and the supervisor manager plus the status rules
// for goals. Status only changes after any process-control step it
// depends on has succeeded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use ovr_goal::{
    action_tree, check_progress, planning, truncate_preview, Action, ActionNode, ActionSpec,
    ActionStatus, AssertionMap, EffectGap, EventDispatcher, Goal, GoalStatus, JsonStateStore,
    LogSink, OverseerEvent, PlanningEngine, Progress, StateStore,
};

use crate::config::{OrchestratorConfig, OrchestratorSettings};
use crate::dispatch::{DispatchController, DispatchOutcome};
use crate::error::OrchestratorError;
use crate::launcher::{SelfExecLauncher, SupervisorLauncher};
use crate::queue::{invalid_queue_name, is_safe_name, FileWorkQueue};
use crate::role_prompts::RolePrompts;
use crate::supervisor::SupervisorManager;
use crate::worker::{ProcessWorkerLauncher, WorkerLauncher};

/// Result of a batch action insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreatedActions {
    pub action_ids: Vec<Uuid>,
    pub created: usize,
    pub failed: usize,
    /// One message per failed item.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl CreatedActions {
    /// Partial success counts as success.
    pub fn success(&self) -> bool {
        self.created > 0 || self.failed == 0
    }
}

/// A completed action's (possibly truncated) result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub action_id: Uuid,
    pub description: String,
    pub role: String,
    pub result: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// One row of `list_goals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalSummary {
    pub id: Uuid,
    pub name: String,
    pub status: GoalStatus,
    pub queue_name: String,
    pub satisfied: usize,
    pub total: usize,
    pub supervisor_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor_pid: Option<u32>,
}

/// Detailed view of one goal.
#[derive(Debug, Clone, Serialize)]
pub struct GoalReport {
    pub goal: Goal,
    pub progress: Progress,
    /// Action counts keyed by status name; every status is present.
    pub counts: BTreeMap<String, usize>,
    pub tree: Vec<ActionNode>,
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    workers: Arc<dyn WorkerLauncher>,
    supervisors: SupervisorManager,
    events: Arc<EventDispatcher>,
    settings: OrchestratorSettings,
    prompts: RolePrompts,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        supervisor_launcher: Arc<dyn SupervisorLauncher>,
        workers: Arc<dyn WorkerLauncher>,
        events: Arc<EventDispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        let supervisors = SupervisorManager::new(store.clone(), supervisor_launcher, events.clone())
            .with_kill_grace(settings.kill_grace())
            .with_stale_after(settings.stale_after())
            .with_respawn_planning(settings.respawn_planning);
        Self {
            store,
            workers,
            supervisors,
            events,
            settings,
            prompts: RolePrompts::builtin_only(),
        }
    }

    /// Resolve worker prompts through `prompts` instead of the built-ins.
    pub fn with_role_prompts(mut self, prompts: RolePrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Wire up the file-backed store, self-exec launchers, and the JSONL
    /// event log for a project.
    pub fn open(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        Self::open_with_exe(config, None)
    }

    /// As [`Orchestrator::open`], re-executing `exe` instead of the
    /// running binary when given.
    pub fn open_with_exe(
        config: &OrchestratorConfig,
        exe: Option<PathBuf>,
    ) -> Result<Self, OrchestratorError> {
        let store = Arc::new(JsonStateStore::new(&config.store_dir)?);
        let queue = FileWorkQueue::new(&config.queues_dir);
        let root = config.project_root.clone();
        let logs = config.logs_dir.clone();
        let (supervisor_launcher, workers) = match exe {
            Some(exe) => (
                SelfExecLauncher::new(exe.clone(), root.clone(), logs.clone()),
                ProcessWorkerLauncher::new(queue, exe, root, logs),
            ),
            None => (
                SelfExecLauncher::current(root.clone(), logs.clone())?,
                ProcessWorkerLauncher::current(queue, root, logs)?,
            ),
        };
        let workers = workers.with_kill_grace(config.orchestrator.kill_grace());
        let mut events = EventDispatcher::new();
        events.add_sink(Box::new(LogSink::new(&config.events_log)));

        Ok(Self::new(
            store,
            Arc::new(supervisor_launcher),
            Arc::new(workers),
            Arc::new(events),
            config.orchestrator.clone(),
        )
        .with_role_prompts(RolePrompts::new(&config.prompts_dir)))
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn workers(&self) -> &dyn WorkerLauncher {
        self.workers.as_ref()
    }

    pub fn supervisors(&self) -> &SupervisorManager {
        &self.supervisors
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn role_prompts(&self) -> &RolePrompts {
        &self.prompts
    }

    fn planning(&self) -> PlanningEngine<'_> {
        PlanningEngine::new(self.store.as_ref())
    }

    fn goal(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        self.store
            .get_goal(goal_id)?
            .ok_or_else(|| OrchestratorError::goal_not_found(goal_id))
    }

    fn set_goal_status(&self, goal_id: Uuid, status: GoalStatus) -> Result<Goal, OrchestratorError> {
        let mut from = status;
        let goal = self.store.update_goal(goal_id, &mut |goal| {
            from = goal.status;
            goal.transition(status)
        })?;
        if from != status {
            tracing::info!(goal_id = %goal_id, from = %from, to = %status, "goal status changed");
            self.events
                .dispatch(&OverseerEvent::goal_status_changed(goal_id, from, status));
        }
        Ok(goal)
    }

    // ── Goals ────────────────────────────────────────────────────

    pub fn create_goal(
        &self,
        name: &str,
        description: &str,
        goal_state: AssertionMap,
        queue_name: Option<String>,
    ) -> Result<Goal, OrchestratorError> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::MissingParams("name".into()));
        }
        if description.trim().is_empty() {
            return Err(OrchestratorError::MissingParams("description".into()));
        }
        let queue_name = queue_name.filter(|q| !q.trim().is_empty());
        if let Some(queue) = queue_name.as_deref() {
            if !is_safe_name(queue) {
                return Err(invalid_queue_name(queue));
            }
        }
        let goal = Goal::new(name, description, goal_state, queue_name);
        self.store.insert_goal(&goal)?;
        tracing::info!(goal_id = %goal.id, name = %goal.name, queue = %goal.queue_name, "goal created");
        self.events
            .dispatch(&OverseerEvent::goal_created(goal.id, &goal.name, &goal.queue_name));
        Ok(goal)
    }

    pub fn get_goal(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        self.goal(goal_id)
    }

    pub fn update_summary(&self, goal_id: Uuid, summary: &str) -> Result<Goal, OrchestratorError> {
        Ok(self.store.update_summary(goal_id, summary)?)
    }

    /// One row per goal. Recorded supervisors are checked against the
    /// kernel; dead ones are cleared and reported as not running.
    pub fn list_goals(&self) -> Result<Vec<GoalSummary>, OrchestratorError> {
        let mut summaries = Vec::new();
        for goal in self.store.list_goals()? {
            let supervisor_pid = match goal.supervisor_pid {
                Some(pid) => self.supervisors.is_alive(goal.id)?.then_some(pid),
                None => None,
            };
            let progress = check_progress(&goal.goal_state, &goal.world_state);
            summaries.push(GoalSummary {
                id: goal.id,
                name: goal.name,
                status: goal.status,
                queue_name: goal.queue_name,
                satisfied: progress.satisfied,
                total: progress.total,
                supervisor_running: supervisor_pid.is_some(),
                supervisor_pid,
            });
        }
        Ok(summaries)
    }

    pub fn goal_status(&self, goal_id: Uuid) -> Result<GoalReport, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        let actions = self.store.list_actions_by_goal(goal_id)?;
        let mut counts: BTreeMap<String, usize> = ActionStatus::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for action in &actions {
            *counts.entry(action.status.to_string()).or_default() += 1;
        }
        Ok(GoalReport {
            progress: check_progress(&goal.goal_state, &goal.world_state),
            goal,
            counts,
            tree: action_tree(&actions),
        })
    }

    // ── Actions ──────────────────────────────────────────────────

    /// Insert a batch of actions. Bad items are counted, not fatal.
    pub fn create_actions(
        &self,
        goal_id: Uuid,
        specs: Vec<ActionSpec>,
    ) -> Result<CreatedActions, OrchestratorError> {
        self.goal(goal_id)?;
        let mut batch = CreatedActions::default();
        for (index, spec) in specs.into_iter().enumerate() {
            match self.insert_action(goal_id, spec) {
                Ok(id) => batch.action_ids.push(id),
                Err(e) => batch.errors.push(format!("item {}: {}", index, e)),
            }
        }
        batch.created = batch.action_ids.len();
        batch.failed = batch.errors.len();

        tracing::info!(goal_id = %goal_id, created = batch.created, failed = batch.failed, "actions created");
        if batch.created > 0 {
            self.events.dispatch(&OverseerEvent::ActionsCreated {
                goal_id,
                action_ids: batch.action_ids.clone(),
                failed: batch.failed,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(batch)
    }

    fn insert_action(&self, goal_id: Uuid, spec: ActionSpec) -> Result<Uuid, OrchestratorError> {
        if spec.description.trim().is_empty() {
            return Err(OrchestratorError::MissingParams("description".into()));
        }
        if let Some(parent_id) = spec.parent_action_id {
            let parent = self
                .store
                .get_action(parent_id)?
                .ok_or_else(|| OrchestratorError::action_not_found(parent_id))?;
            if parent.goal_id != goal_id {
                return Err(OrchestratorError::InvalidState(format!(
                    "parent action {} belongs to another goal",
                    parent_id
                )));
            }
        }
        let action = Action::new(goal_id, spec);
        self.store.insert_action(&action)?;
        Ok(action.id)
    }

    /// Actions of a goal, or the children of `parent`, optionally by status.
    pub fn list_actions(
        &self,
        goal_id: Uuid,
        status: Option<ActionStatus>,
        parent: Option<Uuid>,
    ) -> Result<Vec<Action>, OrchestratorError> {
        let actions = match parent {
            Some(parent_id) => self
                .store
                .list_children(parent_id)?
                .into_iter()
                .filter(|a| a.goal_id == goal_id)
                .collect(),
            None => self.store.list_actions_by_goal(goal_id)?,
        };
        Ok(actions
            .into_iter()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .collect())
    }

    pub fn update_action(
        &self,
        action_id: Uuid,
        status: ActionStatus,
        result: Option<String>,
    ) -> Result<Action, OrchestratorError> {
        let mut from = status;
        let action = self.store.update_action(action_id, &mut |action| {
            from = action.status;
            action.transition(status, result.clone())
        })?;
        tracing::info!(action_id = %action_id, from = %from, to = %status, "action updated");
        if from != status {
            self.events.dispatch(&OverseerEvent::action_status_changed(
                action.goal_id,
                action_id,
                from,
                status,
            ));
        }
        Ok(action)
    }

    pub fn dispatch_action(&self, action_id: Uuid) -> Result<DispatchOutcome, OrchestratorError> {
        let outcome = DispatchController::new(
            self.store.as_ref(),
            self.workers.as_ref(),
            &self.settings,
            &self.prompts,
        )
        .dispatch(action_id)?;
        let goal_id = self.store.require_action(action_id)?.goal_id;
        self.events.dispatch(&OverseerEvent::ActionDispatched {
            goal_id,
            action_id,
            work_item_id: outcome.work_item_id.clone(),
            worker_pid: outcome.worker_pid,
            timestamp: chrono::Utc::now(),
        });
        Ok(outcome)
    }

    /// Ready actions against the goal's persisted world state.
    pub fn list_ready(&self, goal_id: Uuid) -> Result<Vec<Action>, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        Ok(self.planning().list_ready_actions(goal_id, &goal.world_state)?)
    }

    /// Completed actions with results, optionally limited to `action_ids`.
    pub fn get_action_results(
        &self,
        goal_id: Uuid,
        action_ids: Option<&[Uuid]>,
    ) -> Result<Vec<ActionResult>, OrchestratorError> {
        let preview = self.settings.result_preview_chars;
        Ok(self
            .store
            .list_actions_by_status(goal_id, ActionStatus::Completed)?
            .into_iter()
            .filter(|a| action_ids.map_or(true, |ids| ids.contains(&a.id)))
            .filter_map(|a| {
                let (result, truncated) = truncate_preview(a.result.as_deref()?, preview);
                Some(ActionResult {
                    action_id: a.id,
                    description: a.description,
                    role: a.role,
                    result,
                    truncated,
                })
            })
            .collect())
    }

    // ── World state ──────────────────────────────────────────────

    pub fn update_world_state(
        &self,
        goal_id: Uuid,
        assertions: &AssertionMap,
    ) -> Result<AssertionMap, OrchestratorError> {
        let world_state = self.planning().merge_assertions(goal_id, assertions)?;
        self.events.dispatch(&OverseerEvent::WorldStateUpdated {
            goal_id,
            assertions: assertions.clone(),
            timestamp: chrono::Utc::now(),
        });
        Ok(world_state)
    }

    pub fn check_complete(&self, goal_id: Uuid) -> Result<Progress, OrchestratorError> {
        Ok(self.planning().check_complete(goal_id)?)
    }

    /// Skip every pending action so a fresh plan can be created.
    pub fn replan(&self, goal_id: Uuid) -> Result<usize, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        if goal.status.is_terminal() {
            return Err(OrchestratorError::TerminalState {
                goal_id,
                status: goal.status,
            });
        }
        Ok(self.planning().skip_all_pending(goal_id)?)
    }

    /// Completed actions whose declared effects are not all in world state.
    pub fn audit_effects(&self, goal_id: Uuid) -> Result<Vec<EffectGap>, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        let actions = self.store.list_actions_by_goal(goal_id)?;
        let gaps = planning::unmerged_effects(&actions, &goal.world_state);
        for gap in &gaps {
            tracing::warn!(
                goal_id = %goal_id,
                action_id = %gap.action_id,
                missing = ?gap.missing,
                "completed action has unmerged effects"
            );
        }
        Ok(gaps)
    }

    // ── Supervisor control ───────────────────────────────────────

    /// Start (or resume) a goal by spawning its supervisor.
    ///
    /// Paused goals become Active before the spawn and go back to Paused
    /// if it fails. Planning goals stay Planning; the supervisor's plan
    /// phase promotes them.
    pub fn start_goal(&self, goal_id: Uuid) -> Result<u32, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        if !matches!(goal.status, GoalStatus::Planning | GoalStatus::Paused) {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot start goal in status {}",
                goal.status
            )));
        }
        if let Some(pid) = goal.supervisor_pid {
            if self.supervisors.is_alive(goal_id)? {
                return Err(OrchestratorError::SupervisorAlreadyRunning { goal_id, pid });
            }
        }

        let resumed = goal.status == GoalStatus::Paused;
        if resumed {
            self.set_goal_status(goal_id, GoalStatus::Active)?;
        }
        match self.supervisors.spawn(goal_id) {
            Ok(pid) => Ok(pid),
            Err(e) => {
                if resumed {
                    if let Err(revert) = self.set_goal_status(goal_id, GoalStatus::Paused) {
                        tracing::error!(goal_id = %goal_id, "could not revert to paused: {}", revert);
                    }
                }
                Err(e)
            }
        }
    }

    /// Stop an Active goal's supervisor and pause the goal.
    pub fn pause_goal(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        if goal.status != GoalStatus::Active {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot pause goal in status {}",
                goal.status
            )));
        }
        if goal.supervisor_pid.is_some() {
            self.supervisors.kill(goal_id)
        } else {
            self.set_goal_status(goal_id, GoalStatus::Paused)
        }
    }

    /// Stop any supervisor and mark the goal Failed.
    pub fn cancel_goal(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        if goal.status.is_terminal() {
            return Err(OrchestratorError::TerminalState {
                goal_id,
                status: goal.status,
            });
        }
        if goal.supervisor_pid.is_some() {
            self.supervisors.terminate(goal_id)?;
        }
        self.set_goal_status(goal_id, GoalStatus::Failed)
    }

    /// Mark a goal Completed (used by the supervisor loop).
    pub fn complete_goal(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        self.set_goal_status(goal_id, GoalStatus::Completed)
    }

    /// Promote a Planning goal to Active (the supervisor's plan phase).
    pub fn activate_goal(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        self.set_goal_status(goal_id, GoalStatus::Active)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::launcher::test_support::{FakeMode, DEAD_PID};
    use crate::process;
    use crate::process::test_support::spawn_sleeper;
    use ovr_goal::{assertion_map, assertion_set};

    fn spec(description: &str, pre: &[&str], eff: &[&str]) -> ActionSpec {
        ActionSpec {
            description: description.into(),
            preconditions: assertion_set(pre.iter().copied()),
            effects: assertion_set(eff.iter().copied()),
            ..ActionSpec::default()
        }
    }

    fn goal(h: &Harness) -> Goal {
        h.orch
            .create_goal(
                "Build",
                "Build the app",
                assertion_map([("a", true), ("b", true)]),
                None,
            )
            .unwrap()
    }

    #[test]
    fn create_goal_requires_name_and_description() {
        let h = harness(FakeMode::Record);
        assert!(matches!(
            h.orch.create_goal("", "d", AssertionMap::new(), None),
            Err(OrchestratorError::MissingParams(p)) if p == "name"
        ));
        assert!(matches!(
            h.orch.create_goal("n", "  ", AssertionMap::new(), None),
            Err(OrchestratorError::MissingParams(p)) if p == "description"
        ));
        let g = h
            .orch
            .create_goal("n", "d", AssertionMap::new(), Some("custom".into()))
            .unwrap();
        assert_eq!(g.status, GoalStatus::Planning);
        assert_eq!(g.queue_name, "custom");
    }

    #[test]
    fn create_goal_rejects_queue_names_that_are_not_identifiers() {
        let h = harness(FakeMode::Record);
        for queue in ["../escape", "a/b", ".hidden", "x.y"] {
            assert!(
                matches!(
                    h.orch.create_goal("n", "d", AssertionMap::new(), Some(queue.into())),
                    Err(OrchestratorError::InvalidState(m)) if m.contains("invalid queue name")
                ),
                "{queue}"
            );
        }
        assert!(h.orch.list_goals().unwrap().is_empty());

        // Blank means "generate one".
        let g = h
            .orch
            .create_goal("n", "d", AssertionMap::new(), Some("  ".into()))
            .unwrap();
        assert!(g.queue_name.starts_with("goal_"));
    }

    #[test]
    fn create_actions_allows_partial_success() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        let mut orphan = spec("orphan", &[], &["a"]);
        orphan.parent_action_id = Some(Uuid::new_v4());

        let batch = h
            .orch
            .create_actions(g.id, vec![spec("ok", &[], &["a"]), spec("", &[], &["b"]), orphan])
            .unwrap();
        assert_eq!(batch.created, 1);
        assert_eq!(batch.failed, 2);
        assert!(batch.success());
        assert_eq!(batch.errors.len(), 2);

        let none = h.orch.create_actions(g.id, vec![spec("", &[], &[])]).unwrap();
        assert!(!none.success());
    }

    #[test]
    fn create_actions_for_unknown_goal_is_not_found() {
        let h = harness(FakeMode::Record);
        assert!(matches!(
            h.orch.create_actions(Uuid::new_v4(), vec![spec("x", &[], &[])]),
            Err(OrchestratorError::NotFound { kind: "goal", .. })
        ));
    }

    #[test]
    fn update_action_rejects_illegal_transition() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        let id = h.orch.create_actions(g.id, vec![spec("x", &[], &[])]).unwrap().action_ids[0];
        h.orch
            .update_action(id, ActionStatus::Completed, Some("done".into()))
            .unwrap();
        assert!(matches!(
            h.orch.update_action(id, ActionStatus::Running, None),
            Err(OrchestratorError::InvalidState(_))
        ));
        assert!(matches!(
            h.orch.update_action(Uuid::new_v4(), ActionStatus::Running, None),
            Err(OrchestratorError::NotFound { kind: "action", .. })
        ));
    }

    #[test]
    fn two_independent_actions_ready_before_join() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        h.orch
            .create_actions(
                g.id,
                vec![
                    spec("left", &[], &["a"]),
                    spec("right", &[], &["b"]),
                    spec("join", &["a", "b"], &["c"]),
                ],
            )
            .unwrap();
        let ready: Vec<String> = h
            .orch
            .list_ready(g.id)
            .unwrap()
            .into_iter()
            .map(|a| a.description)
            .collect();
        assert_eq!(ready, vec!["left", "right"]);
    }

    #[test]
    fn dispatch_scenarios() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        let mut compound = spec("phase", &[], &["a"]);
        compound.is_compound = true;
        let ids = h
            .orch
            .create_actions(
                g.id,
                vec![
                    compound,
                    spec("done", &[], &[]),
                    spec("w1", &[], &[]),
                    spec("w2", &[], &[]),
                    spec("w3", &[], &[]),
                    spec("w4", &[], &[]),
                ],
            )
            .unwrap()
            .action_ids;
        h.orch
            .update_action(ids[1], ActionStatus::Completed, None)
            .unwrap();

        assert!(matches!(
            h.orch.dispatch_action(ids[0]),
            Err(OrchestratorError::InvalidState(m)) if m == "compound"
        ));
        assert!(matches!(
            h.orch.dispatch_action(ids[1]),
            Err(OrchestratorError::InvalidState(m)) if m == "not pending"
        ));
        for id in &ids[2..5] {
            h.orch.dispatch_action(*id).unwrap();
        }
        assert!(matches!(
            h.orch.dispatch_action(ids[5]),
            Err(OrchestratorError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn action_results_are_truncated_and_filtered() {
        let settings = OrchestratorSettings {
            result_preview_chars: 5,
            ..OrchestratorSettings::default()
        };
        let h = harness_with(FakeMode::Record, settings);
        let g = goal(&h);
        let ids = h
            .orch
            .create_actions(
                g.id,
                vec![spec("long", &[], &[]), spec("short", &[], &[]), spec("open", &[], &[])],
            )
            .unwrap()
            .action_ids;
        h.orch
            .update_action(ids[0], ActionStatus::Completed, Some("abcdefghij".into()))
            .unwrap();
        h.orch
            .update_action(ids[1], ActionStatus::Completed, Some("ok".into()))
            .unwrap();

        let all = h.orch.get_action_results(g.id, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].result, "abcde...[truncated]");
        assert!(all[0].truncated);
        assert!(!all[1].truncated);

        let only = h.orch.get_action_results(g.id, Some(&ids[1..2])).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].description, "short");
    }

    #[test]
    fn goal_status_nests_children_and_counts() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        let mut phase = spec("phase", &[], &["a"]);
        phase.is_compound = true;
        let parent = h.orch.create_actions(g.id, vec![phase]).unwrap().action_ids[0];
        let mut child = spec("child", &[], &["a"]);
        child.parent_action_id = Some(parent);
        h.orch.create_actions(g.id, vec![child]).unwrap();

        let report = h.orch.goal_status(g.id).unwrap();
        assert_eq!(report.counts["pending"], 2);
        assert_eq!(report.counts["skipped"], 0);
        assert_eq!(report.tree.len(), 1);
        assert_eq!(report.tree[0].children.len(), 1);

        let children = h.orch.list_actions(g.id, None, Some(parent)).unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn replan_skips_pending_and_new_actions_still_run() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        h.orch
            .create_actions(g.id, vec![spec("old", &["x"], &["a"])])
            .unwrap();
        assert_eq!(h.orch.replan(g.id).unwrap(), 1);

        h.orch
            .create_actions(g.id, vec![spec("new", &["x"], &["a"])])
            .unwrap();
        h.orch
            .update_world_state(g.id, &assertion_map([("x", true)]))
            .unwrap();
        let ready: Vec<String> = h
            .orch
            .list_ready(g.id)
            .unwrap()
            .into_iter()
            .map(|a| a.description)
            .collect();
        assert_eq!(ready, vec!["new"]);

        h.orch.cancel_goal(g.id).unwrap();
        assert!(matches!(
            h.orch.replan(g.id),
            Err(OrchestratorError::TerminalState { .. })
        ));
    }

    #[test]
    fn audit_flags_completed_actions_without_merged_effects() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        let id = h.orch.create_actions(g.id, vec![spec("x", &[], &["a"])]).unwrap().action_ids[0];
        h.orch.update_action(id, ActionStatus::Completed, None).unwrap();
        assert_eq!(h.orch.audit_effects(g.id).unwrap().len(), 1);
        h.orch
            .update_world_state(g.id, &assertion_map([("a", true)]))
            .unwrap();
        assert!(h.orch.audit_effects(g.id).unwrap().is_empty());
    }

    #[test]
    fn start_planning_goal_keeps_planning_and_spawns() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        let pid = h.orch.start_goal(g.id).unwrap();
        assert_eq!(pid, DEAD_PID);
        let stored = h.orch.get_goal(g.id).unwrap();
        assert_eq!(stored.status, GoalStatus::Planning);
        assert_eq!(stored.supervisor_pid, Some(DEAD_PID));
    }

    #[test]
    fn start_with_dead_record_respawns() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        h.orch.start_goal(g.id).unwrap();
        // DEAD_PID is never alive, so the stale record is cleared.
        h.orch.start_goal(g.id).unwrap();
        assert_eq!(h.launcher.call_count(), 2);
    }

    #[test]
    fn start_with_live_supervisor_is_refused() {
        let h = harness(FakeMode::Spawn("exec sleep 30"));
        let g = goal(&h);
        let pid = h.orch.start_goal(g.id).unwrap();
        assert!(matches!(
            h.orch.start_goal(g.id),
            Err(OrchestratorError::SupervisorAlreadyRunning { pid: p, .. }) if p == pid
        ));
        process::terminate(pid, std::time::Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn resume_failure_reverts_to_paused() {
        let h = harness(FakeMode::Fail);
        let g = goal(&h);
        h.orch.activate_goal(g.id).unwrap();
        h.orch.pause_goal(g.id).unwrap();

        assert!(matches!(
            h.orch.start_goal(g.id),
            Err(OrchestratorError::Launch(_))
        ));
        assert_eq!(h.orch.get_goal(g.id).unwrap().status, GoalStatus::Paused);
    }

    #[test]
    fn pause_requires_active_and_kills_supervisor() {
        let h = harness(FakeMode::Spawn("trap '' TERM; while :; do sleep 1; done"));
        let g = goal(&h);
        assert!(matches!(
            h.orch.pause_goal(g.id),
            Err(OrchestratorError::InvalidState(_))
        ));

        h.orch.activate_goal(g.id).unwrap();
        let pid = h.orch.supervisors().spawn(g.id).unwrap();
        // Let the shell install its TERM trap.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let paused = h.orch.pause_goal(g.id).unwrap();
        assert_eq!(paused.status, GoalStatus::Paused);
        assert!(paused.supervisor_pid.is_none());
        assert_eq!(process::probe(pid), process::Probe::Gone);
    }

    #[test]
    fn cancel_rejects_terminal_goals() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        h.orch.start_goal(g.id).unwrap();
        let cancelled = h.orch.cancel_goal(g.id).unwrap();
        assert_eq!(cancelled.status, GoalStatus::Failed);
        assert!(cancelled.supervisor_pid.is_none());
        assert!(matches!(
            h.orch.cancel_goal(g.id),
            Err(OrchestratorError::TerminalState { status: GoalStatus::Failed, .. })
        ));
    }

    #[test]
    fn goals_are_isolated() {
        let h = harness(FakeMode::Record);
        let a = goal(&h);
        let b = goal(&h);
        h.orch.create_actions(a.id, vec![spec("x", &[], &["a"])]).unwrap();
        h.orch
            .update_world_state(a.id, &assertion_map([("a", true)]))
            .unwrap();
        let sleeper = spawn_sleeper(30);
        h.orch
            .store()
            .update_supervisor(a.id, sleeper, chrono::Utc::now())
            .unwrap();

        let other = h.orch.get_goal(b.id).unwrap();
        assert!(other.world_state.is_empty());
        assert!(other.supervisor_pid.is_none());
        assert!(h.orch.list_actions(b.id, None, None).unwrap().is_empty());

        let listed = h.orch.list_goals().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!((listed[0].satisfied, listed[0].total), (1, 2));
        assert!(listed[0].supervisor_running);
        assert_eq!(listed[0].supervisor_pid, Some(sleeper));
        assert!(!listed[1].supervisor_running);
        process::terminate(sleeper, std::time::Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn list_goals_reports_dead_supervisor_as_not_running() {
        let h = harness(FakeMode::Record);
        let g = goal(&h);
        h.orch.start_goal(g.id).unwrap();
        assert_eq!(h.orch.get_goal(g.id).unwrap().supervisor_pid, Some(DEAD_PID));

        let listed = h.orch.list_goals().unwrap();
        assert!(!listed[0].supervisor_running);
        assert!(listed[0].supervisor_pid.is_none());
        // The dead record was cleared on the way.
        assert!(h.orch.get_goal(g.id).unwrap().supervisor_pid.is_none());
    }
}
