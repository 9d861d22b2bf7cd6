// runner.rs — The supervisor and worker roles.
//
// A supervisor owns every dispatch decision for its goal, so the
// read-then-act capacity check in dispatch is exact while only one
// supervisor runs per goal. Each tick:
//   0. confirm the goal's supervisor record names this process (adopting
//      an empty record) and heartbeat it; any other pid ends the loop
//   1. collect finished work items (completed ⇒ merge declared effects)
//   2. roll up compound actions whose children all completed
//   3. dispatch ready primitive actions until capacity is reached
//   4. check completion
//
// A worker claims one item from its queue, runs the configured command,
// and records the outcome on the item.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use ovr_goal::{Action, ActionStatus, AssertionMap, GoalStatus};

use crate::api::Orchestrator;
use crate::config::OrchestratorSettings;
use crate::error::OrchestratorError;
use crate::launcher::SupervisorPhase;
use crate::process;
use crate::queue::{FileWorkQueue, WorkItem, WorkItemStatus};
use crate::worker::WorkOutcome;

/// Consecutive failing ticks before a supervisor gives up.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Route SIGTERM and SIGINT to a process-wide stop flag and return it.
pub fn install_stop_handlers() -> &'static AtomicBool {
    let handler = request_stop as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // Safety: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    }
    &STOP_REQUESTED
}

/// Why a supervisor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Every goal-state assertion holds.
    Complete,
    /// The goal left Planning/Active underneath us (paused, cancelled).
    GoalInactive,
    /// Another supervisor is recorded for the goal.
    Superseded,
    /// SIGTERM/SIGINT.
    Stopped,
    /// Too many consecutive errors.
    Failed,
}

impl SupervisorExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorExit::Complete | SupervisorExit::GoalInactive | SupervisorExit::Superseded => 0,
            SupervisorExit::Failed => 1,
            SupervisorExit::Stopped => 2,
        }
    }
}

pub struct SupervisorLoop<'a> {
    orch: &'a Orchestrator,
    goal_id: Uuid,
    phase: SupervisorPhase,
    stop: &'a AtomicBool,
    worker_pids: Vec<u32>,
    stalled: bool,
}

impl<'a> SupervisorLoop<'a> {
    pub fn new(
        orch: &'a Orchestrator,
        goal_id: Uuid,
        phase: SupervisorPhase,
        stop: &'a AtomicBool,
    ) -> Self {
        Self {
            orch,
            goal_id,
            phase,
            stop,
            worker_pids: Vec::new(),
            stalled: false,
        }
    }

    /// Tick until the goal completes, leaves a runnable status, a stop is
    /// requested, or errors pile up. Releases this process's supervisor
    /// record on the way out.
    pub fn run(&mut self) -> SupervisorExit {
        let interval = self.orch.settings().poll_interval();
        tracing::info!(goal_id = %self.goal_id, phase = %self.phase, "supervisor started");

        let mut errors = 0;
        let exit = loop {
            if self.stop.load(Ordering::SeqCst) {
                break SupervisorExit::Stopped;
            }
            match self.tick() {
                Ok(Some(exit)) => break exit,
                Ok(None) => errors = 0,
                Err(e) => {
                    errors += 1;
                    tracing::error!(goal_id = %self.goal_id, errors, "supervisor tick failed: {}", e);
                    if errors >= MAX_CONSECUTIVE_ERRORS {
                        break SupervisorExit::Failed;
                    }
                }
            }
            self.sleep(interval);
        };

        self.reap_workers();
        if let Err(e) = self
            .orch
            .supervisors()
            .release(self.goal_id, std::process::id(), "supervisor exited")
        {
            tracing::debug!(goal_id = %self.goal_id, "could not release supervisor record: {}", e);
        }
        tracing::info!(goal_id = %self.goal_id, exit = ?exit, "supervisor finished");
        exit
    }

    /// Sleep in short slices so a stop request is noticed promptly.
    fn sleep(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        while !self.stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }

    /// One pass of the loop. `Some` means the loop should end.
    pub fn tick(&mut self) -> Result<Option<SupervisorExit>, OrchestratorError> {
        let goal = self.orch.get_goal(self.goal_id)?;
        if !matches!(goal.status, GoalStatus::Planning | GoalStatus::Active) {
            tracing::info!(goal_id = %self.goal_id, status = %goal.status, "goal no longer runnable");
            return Ok(Some(SupervisorExit::GoalInactive));
        }
        if let Some(owner) = self.hold_record()? {
            tracing::warn!(
                goal_id = %self.goal_id,
                owner,
                "another supervisor is recorded for this goal; standing down"
            );
            return Ok(Some(SupervisorExit::Superseded));
        }

        if goal.status == GoalStatus::Planning {
            let actions = self.orch.store().list_actions_by_goal(self.goal_id)?;
            if actions.is_empty() {
                tracing::debug!(goal_id = %self.goal_id, "waiting for a plan");
                return Ok(None);
            }
            self.orch.activate_goal(self.goal_id)?;
            self.phase = SupervisorPhase::Execute;
        }

        let collected = self.collect_finished(&goal.queue_name)?;
        let rolled_up = self.roll_up_compounds()?;
        let dispatched = self.dispatch_ready()?;
        self.reap_workers();

        let progress = self.orch.check_complete(self.goal_id)?;
        if progress.complete {
            self.orch.complete_goal(self.goal_id)?;
            self.orch.update_summary(
                self.goal_id,
                &format!(
                    "Completed: {}/{} goal assertions satisfied",
                    progress.satisfied, progress.total
                ),
            )?;
            return Ok(Some(SupervisorExit::Complete));
        }

        let running = self
            .orch
            .store()
            .count_by_status(self.goal_id, ActionStatus::Running)?;
        let stalled = collected + rolled_up + dispatched == 0 && running == 0;
        if stalled && !self.stalled {
            tracing::warn!(
                goal_id = %self.goal_id,
                missing = ?progress.missing,
                "goal is stalled: nothing running and nothing ready"
            );
        }
        self.stalled = stalled;
        Ok(None)
    }

    /// Heartbeat this process's supervisor record, adopting it when empty.
    /// Returns the recorded pid when it belongs to someone else.
    fn hold_record(&self) -> Result<Option<u32>, OrchestratorError> {
        let me = std::process::id();
        let mut owner = None;
        let mut adopted = false;
        self.orch.store().update_goal(self.goal_id, &mut |goal| {
            owner = None;
            adopted = false;
            match goal.supervisor_pid {
                Some(pid) if pid != me => owner = Some(pid),
                Some(_) => goal.heartbeat(Utc::now()),
                None => {
                    let now = Utc::now();
                    goal.set_supervisor(me, now);
                    goal.heartbeat(now);
                    adopted = true;
                }
            }
            Ok(())
        })?;
        if adopted {
            tracing::info!(goal_id = %self.goal_id, pid = me, "supervisor record adopted");
        }
        Ok(owner)
    }

    /// Apply finished work items to their actions. Returns how many.
    ///
    /// Effects are merged before the action is marked Completed; if the
    /// merge fails the action stays Running and is collected again.
    fn collect_finished(&self, queue: &str) -> Result<usize, OrchestratorError> {
        let running = self
            .orch
            .store()
            .list_actions_by_status(self.goal_id, ActionStatus::Running)?;
        let mut collected = 0;
        for action in running {
            let Some(work_item_id) = action.work_item_id.as_deref() else {
                continue;
            };
            match self.orch.workers().poll_work_item(queue, work_item_id)? {
                WorkOutcome::InProgress => continue,
                WorkOutcome::Done(result) => {
                    self.merge_effects(&action)?;
                    self.orch
                        .update_action(action.id, ActionStatus::Completed, Some(result))?;
                }
                WorkOutcome::Failed(result) | WorkOutcome::Lost(result) => {
                    tracing::warn!(action_id = %action.id, "action failed: {}", result);
                    self.orch
                        .update_action(action.id, ActionStatus::Failed, Some(result))?;
                }
            }
            collected += 1;
        }
        Ok(collected)
    }

    fn merge_effects(&self, action: &Action) -> Result<(), OrchestratorError> {
        if action.effects.is_empty() {
            return Ok(());
        }
        let effects: AssertionMap = action.effects.iter().map(|e| (e.clone(), true)).collect();
        self.orch.update_world_state(self.goal_id, &effects)?;
        Ok(())
    }

    /// Complete compound actions whose children have all completed.
    fn roll_up_compounds(&self) -> Result<usize, OrchestratorError> {
        let actions = self.orch.store().list_actions_by_goal(self.goal_id)?;
        let mut rolled_up = 0;
        for compound in actions.iter().filter(|a| {
            a.is_compound && matches!(a.status, ActionStatus::Pending | ActionStatus::Running)
        }) {
            let mut children = actions
                .iter()
                .filter(|c| c.parent_action_id == Some(compound.id))
                .peekable();
            if children.peek().is_none() {
                continue;
            }
            if children.all(|c| c.status == ActionStatus::Completed) {
                self.merge_effects(compound)?;
                self.orch.update_action(
                    compound.id,
                    ActionStatus::Completed,
                    Some("All child actions completed".into()),
                )?;
                rolled_up += 1;
            }
        }
        Ok(rolled_up)
    }

    /// Dispatch ready primitive actions until capacity runs out.
    fn dispatch_ready(&mut self) -> Result<usize, OrchestratorError> {
        let mut dispatched = 0;
        for action in self.orch.list_ready(self.goal_id)? {
            if action.is_compound {
                continue;
            }
            match self.orch.dispatch_action(action.id) {
                Ok(outcome) => {
                    self.worker_pids.push(outcome.worker_pid);
                    dispatched += 1;
                }
                Err(OrchestratorError::CapacityExceeded { .. }) => break,
                Err(OrchestratorError::InvalidState(reason)) => {
                    tracing::debug!(action_id = %action.id, "not dispatched: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(dispatched)
    }

    /// Collect exited workers so they do not linger as zombies.
    fn reap_workers(&mut self) {
        self.worker_pids.retain(|pid| !process::has_exited(*pid));
    }
}

/// Outcome of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRun {
    /// The queue had nothing pending.
    Idle,
    Finished {
        work_item_id: String,
        status: WorkItemStatus,
    },
}

/// Claim one item from `queue_name` and run the configured command on it.
pub fn run_worker(
    queue: &FileWorkQueue,
    queue_name: &str,
    settings: &OrchestratorSettings,
) -> Result<WorkerRun, OrchestratorError> {
    let Some(item) = queue.claim_next(queue_name, std::process::id())? else {
        tracing::info!(queue = queue_name, "no pending work");
        return Ok(WorkerRun::Idle);
    };
    tracing::info!(queue = queue_name, work_item_id = %item.id, "work item claimed");

    let (status, result) = match settings.worker_command.as_deref() {
        None => (
            WorkItemStatus::Failed,
            "no worker_command configured in [orchestrator]".to_string(),
        ),
        Some(command) => execute_with_retries(queue, &item, command)?,
    };

    queue.finish(queue_name, &item.id, status, result)?;
    tracing::info!(work_item_id = %item.id, status = ?status, "work item finished");
    Ok(WorkerRun::Finished {
        work_item_id: item.id,
        status,
    })
}

fn execute_with_retries(
    queue: &FileWorkQueue,
    item: &WorkItem,
    command: &str,
) -> Result<(WorkItemStatus, String), OrchestratorError> {
    let input = serde_json::to_vec(&item.context).map_err(|e| OrchestratorError::Store(e.into()))?;
    let budget = item.retry_budget.max(1);
    let mut last_error = String::new();
    for attempt in 1..=budget {
        queue.record_attempt(&item.queue, &item.id)?;
        match run_command(command, &input, item) {
            Ok(stdout) => return Ok((WorkItemStatus::Done, stdout)),
            Err(message) => {
                tracing::warn!(work_item_id = %item.id, attempt, budget, "attempt failed: {}", message);
                last_error = message;
            }
        }
    }
    Ok((WorkItemStatus::Failed, last_error))
}

/// Run `command` through `sh -c` with `input` on stdin. Success yields
/// stdout; failure yields stderr (or the exit status when stderr is empty).
///
/// The action's role and system prompt are also exported as `OVR_ROLE`
/// and `OVR_SYSTEM_PROMPT` when the context carries them.
fn run_command(command: &str, input: &[u8], item: &WorkItem) -> Result<String, String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env("OVR_WORK_ITEM_ID", &item.id)
        .env("OVR_QUEUE", &item.queue);
    for (key, var) in [("role", "OVR_ROLE"), ("system_prompt", "OVR_SYSTEM_PROMPT")] {
        if let Some(value) = item.context.get(key).and_then(|v| v.as_str()) {
            cmd.env(var, value);
        }
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to start worker command: {}", e))?;

    // Feed stdin from a thread so a chatty command cannot deadlock us.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.to_vec();
        thread::spawn(move || {
            // A command that ignores stdin closes the pipe early; that's fine.
            let _ = stdin.write_all(&input);
        })
    });
    let output = child
        .wait_with_output()
        .map_err(|e| format!("failed to wait for worker command: {}", e))?;
    if let Some(writer) = writer {
        let _ = writer.join();
    }

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
    if stderr.is_empty() {
        Err(format!("worker command exited with {}", output.status))
    } else {
        Err(stderr)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::test_support::{harness, harness_with, Harness};
    use crate::launcher::test_support::{FakeLauncher, FakeMode, DEAD_PID};
    use crate::worker::test_support::FakeWorkers;
    use ovr_goal::{
        assertion_map, assertion_set, ActionMutation, ActionSpec, EventDispatcher, Goal,
        GoalError, GoalMutation, MemoryStateStore, StateStore,
    };
    use serde_json::json;
    use tempfile::tempdir;

    /// Memory store whose world-state writes can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStateStore,
        fail_world_writes: AtomicBool,
    }

    impl StateStore for FlakyStore {
        fn insert_goal(&self, goal: &Goal) -> Result<(), GoalError> {
            self.inner.insert_goal(goal)
        }
        fn get_goal(&self, id: Uuid) -> Result<Option<Goal>, GoalError> {
            self.inner.get_goal(id)
        }
        fn list_goals(&self) -> Result<Vec<Goal>, GoalError> {
            self.inner.list_goals()
        }
        fn update_goal(&self, id: Uuid, mutate: GoalMutation<'_>) -> Result<Goal, GoalError> {
            if self.fail_world_writes.load(Ordering::SeqCst) {
                if let Some(mut copy) = self.inner.get_goal(id)? {
                    let before = copy.world_state.clone();
                    mutate(&mut copy)?;
                    if copy.world_state != before {
                        return Err(GoalError::IoError {
                            path: "goals".into(),
                            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                        });
                    }
                }
            }
            self.inner.update_goal(id, mutate)
        }
        fn insert_action(&self, action: &Action) -> Result<(), GoalError> {
            self.inner.insert_action(action)
        }
        fn get_action(&self, id: Uuid) -> Result<Option<Action>, GoalError> {
            self.inner.get_action(id)
        }
        fn list_actions_by_goal(&self, goal_id: Uuid) -> Result<Vec<Action>, GoalError> {
            self.inner.list_actions_by_goal(goal_id)
        }
        fn update_action(&self, id: Uuid, mutate: ActionMutation<'_>) -> Result<Action, GoalError> {
            self.inner.update_action(id, mutate)
        }
    }

    fn spec(description: &str, pre: &[&str], eff: &[&str]) -> ActionSpec {
        ActionSpec {
            description: description.into(),
            preconditions: assertion_set(pre.iter().copied()),
            effects: assertion_set(eff.iter().copied()),
            ..ActionSpec::default()
        }
    }

    fn finish_running(h: &Harness, goal_id: Uuid, result: &str) {
        for action in h
            .orch
            .store()
            .list_actions_by_status(goal_id, ActionStatus::Running)
            .unwrap()
        {
            if let Some(wi) = action.work_item_id {
                h.workers.complete(&wi, WorkOutcome::Done(result.into()));
            }
        }
    }

    #[test]
    fn planning_goal_waits_for_actions_then_activates() {
        let h = harness(FakeMode::Record);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("a", true)]), None)
            .unwrap();
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Plan, &stop);

        assert_eq!(sup.tick().unwrap(), None);
        assert_eq!(h.orch.get_goal(goal.id).unwrap().status, GoalStatus::Planning);

        h.orch.create_actions(goal.id, vec![spec("A", &[], &["a"])]).unwrap();
        assert_eq!(sup.tick().unwrap(), None);
        assert_eq!(h.orch.get_goal(goal.id).unwrap().status, GoalStatus::Active);
        assert_eq!(
            h.orch
                .store()
                .count_by_status(goal.id, ActionStatus::Running)
                .unwrap(),
            1
        );
    }

    #[test]
    fn linear_chain_runs_to_completion() {
        let h = harness(FakeMode::Record);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("a", true), ("b", true)]), None)
            .unwrap();
        h.orch
            .create_actions(goal.id, vec![spec("A", &[], &["a"]), spec("B", &["a"], &["b"])])
            .unwrap();
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Plan, &stop);

        let mut exit = None;
        for _ in 0..10 {
            exit = sup.tick().unwrap();
            if exit.is_some() {
                break;
            }
            finish_running(&h, goal.id, "ok");
        }
        assert_eq!(exit, Some(SupervisorExit::Complete));
        let goal = h.orch.get_goal(goal.id).unwrap();
        assert_eq!(goal.status, GoalStatus::Completed);
        assert_eq!(goal.world_state, assertion_map([("a", true), ("b", true)]));
        assert!(goal.summary.unwrap().contains("2/2"));
    }

    #[test]
    fn failed_work_marks_action_failed_without_merging() {
        let h = harness(FakeMode::Record);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("a", true)]), None)
            .unwrap();
        let id = h
            .orch
            .create_actions(goal.id, vec![spec("A", &[], &["a"])])
            .unwrap()
            .action_ids[0];
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Plan, &stop);
        sup.tick().unwrap();

        let wi = h.orch.store().require_action(id).unwrap().work_item_id.unwrap();
        h.workers.complete(&wi, WorkOutcome::Failed("compiler error".into()));
        assert_eq!(sup.tick().unwrap(), None);

        let action = h.orch.store().require_action(id).unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.result.as_deref(), Some("compiler error"));
        assert!(h.orch.get_goal(goal.id).unwrap().world_state.is_empty());
    }

    #[test]
    fn failed_merge_leaves_action_running_until_it_succeeds() {
        let store = Arc::new(FlakyStore::default());
        let workers = Arc::new(FakeWorkers::new());
        let orch = Orchestrator::new(
            store.clone(),
            Arc::new(FakeLauncher::new(FakeMode::Record)),
            workers.clone(),
            Arc::new(EventDispatcher::new()),
            OrchestratorSettings::default(),
        );
        let goal = orch
            .create_goal("g", "d", assertion_map([("a", true), ("b", true)]), None)
            .unwrap();
        let ids = orch
            .create_actions(goal.id, vec![spec("A", &[], &["a"]), spec("B", &[], &["b"])])
            .unwrap()
            .action_ids;
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&orch, goal.id, SupervisorPhase::Plan, &stop);
        sup.tick().unwrap();

        let wi = orch.store().require_action(ids[0]).unwrap().work_item_id.unwrap();
        workers.complete(&wi, WorkOutcome::Done("built a".into()));
        store.fail_world_writes.store(true, Ordering::SeqCst);
        assert!(sup.tick().is_err());

        // Not Completed with its effect missing.
        let action = orch.store().require_action(ids[0]).unwrap();
        assert_eq!(action.status, ActionStatus::Running);
        assert!(orch.audit_effects(goal.id).unwrap().is_empty());

        store.fail_world_writes.store(false, Ordering::SeqCst);
        assert_eq!(sup.tick().unwrap(), None);
        let action = orch.store().require_action(ids[0]).unwrap();
        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.result.as_deref(), Some("built a"));
        assert_eq!(orch.get_goal(goal.id).unwrap().world_state.get("a"), Some(&true));
    }

    #[test]
    fn tick_adopts_an_empty_record_and_heartbeats() {
        let h = harness(FakeMode::Record);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("a", true)]), None)
            .unwrap();
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Plan, &stop);

        sup.tick().unwrap();
        let first = h.orch.get_goal(goal.id).unwrap();
        assert_eq!(first.supervisor_pid, Some(std::process::id()));
        let beat = first.supervisor_heartbeat_at.unwrap();

        std::thread::sleep(Duration::from_millis(5));
        sup.tick().unwrap();
        let second = h.orch.get_goal(goal.id).unwrap();
        assert_eq!(second.supervisor_pid, Some(std::process::id()));
        assert_eq!(second.supervisor_started_at, first.supervisor_started_at);
        assert!(second.supervisor_heartbeat_at.unwrap() > beat);
    }

    #[test]
    fn supervisor_stands_down_when_another_pid_is_recorded() {
        let settings = OrchestratorSettings {
            poll_interval_ms: 1,
            ..OrchestratorSettings::default()
        };
        let h = harness_with(FakeMode::Record, settings);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("a", true)]), None)
            .unwrap();
        h.orch.create_actions(goal.id, vec![spec("A", &[], &["a"])]).unwrap();
        h.orch.activate_goal(goal.id).unwrap();
        // A replacement supervisor took over the record.
        h.orch
            .store()
            .update_supervisor(goal.id, DEAD_PID, Utc::now())
            .unwrap();

        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Execute, &stop);
        assert_eq!(sup.tick().unwrap(), Some(SupervisorExit::Superseded));
        assert_eq!(
            h.orch
                .store()
                .count_by_status(goal.id, ActionStatus::Running)
                .unwrap(),
            0
        );

        let exit = sup.run();
        assert_eq!(exit, SupervisorExit::Superseded);
        assert_eq!(exit.exit_code(), 0);
        // The replacement's record is left alone.
        assert_eq!(h.orch.get_goal(goal.id).unwrap().supervisor_pid, Some(DEAD_PID));
        assert_eq!(h.workers.item_count(), 0);
    }

    #[test]
    fn dispatch_stops_at_capacity() {
        let settings = OrchestratorSettings {
            max_workers_per_goal: 2,
            ..OrchestratorSettings::default()
        };
        let h = harness_with(FakeMode::Record, settings);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("x", true)]), None)
            .unwrap();
        h.orch
            .create_actions(
                goal.id,
                (0..4).map(|i| spec(&format!("t{i}"), &[], &[])).collect(),
            )
            .unwrap();
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Plan, &stop);
        sup.tick().unwrap();
        assert_eq!(
            h.orch
                .store()
                .count_by_status(goal.id, ActionStatus::Running)
                .unwrap(),
            2
        );
    }

    #[test]
    fn compound_completes_when_children_do() {
        let h = harness(FakeMode::Record);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("phase_done", true)]), None)
            .unwrap();
        let mut phase = spec("phase", &[], &["phase_done"]);
        phase.is_compound = true;
        let parent = h.orch.create_actions(goal.id, vec![phase]).unwrap().action_ids[0];
        let mut child = spec("child", &[], &["child_done"]);
        child.parent_action_id = Some(parent);
        h.orch.create_actions(goal.id, vec![child]).unwrap();

        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Execute, &stop);
        assert_eq!(sup.tick().unwrap(), None);
        finish_running(&h, goal.id, "done");
        assert_eq!(sup.tick().unwrap(), Some(SupervisorExit::Complete));
        assert_eq!(
            h.orch.store().require_action(parent).unwrap().status,
            ActionStatus::Completed
        );
    }

    #[test]
    fn paused_goal_ends_the_loop() {
        let h = harness(FakeMode::Record);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("a", true)]), None)
            .unwrap();
        h.orch.activate_goal(goal.id).unwrap();
        h.orch.pause_goal(goal.id).unwrap();
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Execute, &stop);
        assert_eq!(sup.tick().unwrap(), Some(SupervisorExit::GoalInactive));
    }

    #[test]
    fn stop_flag_ends_run_with_code_two() {
        let h = harness(FakeMode::Record);
        let goal = h
            .orch
            .create_goal("g", "d", assertion_map([("a", true)]), None)
            .unwrap();
        let stop = AtomicBool::new(true);
        let mut sup = SupervisorLoop::new(&h.orch, goal.id, SupervisorPhase::Plan, &stop);
        let exit = sup.run();
        assert_eq!(exit, SupervisorExit::Stopped);
        assert_eq!(exit.exit_code(), 2);
    }

    #[test]
    fn repeated_errors_abort_the_supervisor() {
        let settings = OrchestratorSettings {
            poll_interval_ms: 1,
            ..OrchestratorSettings::default()
        };
        let h = harness_with(FakeMode::Record, settings);
        let stop = AtomicBool::new(false);
        let mut sup = SupervisorLoop::new(&h.orch, Uuid::new_v4(), SupervisorPhase::Execute, &stop);
        let exit = sup.run();
        assert_eq!(exit, SupervisorExit::Failed);
        assert_eq!(exit.exit_code(), 1);
    }

    fn settings_with(command: Option<&str>) -> OrchestratorSettings {
        OrchestratorSettings {
            worker_command: command.map(str::to_string),
            ..OrchestratorSettings::default()
        }
    }

    #[test]
    fn worker_runs_command_with_context_on_stdin() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        let item = queue
            .enqueue("q", "task", json!({"action": "write docs"}), 3)
            .unwrap();

        let settings = settings_with(Some("cat; printf ' %s' \"$OVR_QUEUE\""));
        let run = run_worker(&queue, "q", &settings).unwrap();
        assert_eq!(
            run,
            WorkerRun::Finished {
                work_item_id: item.id.clone(),
                status: WorkItemStatus::Done,
            }
        );
        let stored = queue.get("q", &item.id).unwrap().unwrap();
        assert_eq!(stored.result.as_deref(), Some("{\"action\":\"write docs\"} q"));
        assert_eq!(stored.attempts, 1);
    }

    #[test]
    fn worker_exports_role_and_system_prompt() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        let item = queue
            .enqueue(
                "q",
                "task",
                json!({"role": "testing", "system_prompt": "Test everything."}),
                1,
            )
            .unwrap();

        let settings = settings_with(Some("printf '%s|%s' \"$OVR_ROLE\" \"$OVR_SYSTEM_PROMPT\""));
        run_worker(&queue, "q", &settings).unwrap();
        let stored = queue.get("q", &item.id).unwrap().unwrap();
        assert_eq!(stored.result.as_deref(), Some("testing|Test everything."));
    }

    #[test]
    fn worker_retries_then_records_last_error() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        let item = queue.enqueue("q", "task", json!({}), 2).unwrap();

        let settings = settings_with(Some("echo broken >&2; exit 3"));
        run_worker(&queue, "q", &settings).unwrap();
        let stored = queue.get("q", &item.id).unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.result.as_deref(), Some("broken"));
    }

    #[test]
    fn worker_without_command_fails_item() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        let item = queue.enqueue("q", "task", json!({}), 1).unwrap();
        run_worker(&queue, "q", &settings_with(None)).unwrap();
        let stored = queue.get("q", &item.id).unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Failed);
        assert!(stored.result.unwrap().contains("worker_command"));
    }

    #[test]
    fn idle_queue_reports_idle() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        assert_eq!(
            run_worker(&queue, "q", &settings_with(Some("true"))).unwrap(),
            WorkerRun::Idle
        );
    }
}
