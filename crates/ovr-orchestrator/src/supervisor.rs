// supervisor.rs — Supervisor lifecycle: spawn, liveness, reap, kill,
// start-up reconciliation, and respawn.
//
// Per-goal state is derived on every call from the recorded pid plus a
// kernel probe; nothing is cached. "Process not found" is expected and
// self-correcting: the stale pid is cleared and the call carries on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use ovr_goal::{EventDispatcher, Goal, GoalStatus, OverseerEvent, StateStore};

use crate::error::OrchestratorError;
use crate::launcher::{SupervisorLauncher, SupervisorPhase};
use crate::process;

pub struct SupervisorManager {
    store: Arc<dyn StateStore>,
    launcher: Arc<dyn SupervisorLauncher>,
    events: Arc<EventDispatcher>,
    kill_grace: Duration,
    stale_after: Option<Duration>,
    respawn_planning: bool,
}

impl SupervisorManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        launcher: Arc<dyn SupervisorLauncher>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            store,
            launcher,
            events,
            kill_grace: Duration::from_millis(100),
            stale_after: Some(Duration::from_secs(3600)),
            respawn_planning: false,
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_respawn_planning(mut self, enabled: bool) -> Self {
        self.respawn_planning = enabled;
        self
    }

    fn goal(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        self.store
            .get_goal(goal_id)?
            .ok_or_else(|| OrchestratorError::goal_not_found(goal_id))
    }

    /// Drop the recorded pid, but only if it is still `pid`.
    pub fn release(&self, goal_id: Uuid, pid: u32, reason: &str) -> Result<(), OrchestratorError> {
        let mut cleared = false;
        self.store.update_goal(goal_id, &mut |goal| {
            if goal.supervisor_pid == Some(pid) {
                goal.clear_supervisor();
                cleared = true;
            }
            Ok(())
        })?;
        if cleared {
            tracing::info!(goal_id = %goal_id, pid, reason, "supervisor record cleared");
            self.events
                .dispatch(&OverseerEvent::supervisor_cleared(goal_id, pid, reason));
        }
        Ok(())
    }

    /// Start a supervisor for the goal and record its pid and start time.
    ///
    /// Does not check for an existing supervisor; callers probe first.
    pub fn spawn(&self, goal_id: Uuid) -> Result<u32, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        let phase = SupervisorPhase::for_status(goal.status);
        let pid = self.launcher.launch(&goal, phase)?;

        if let Err(e) = self.store.update_supervisor(goal_id, pid, Utc::now()) {
            // Unrecorded supervisors could never be reaped or killed.
            tracing::error!(goal_id = %goal_id, pid, "failed to record supervisor, killing it: {}", e);
            if let Err(kill_err) = process::send_signal(pid, process::Signal::Forceful) {
                tracing::warn!(pid, "kill after failed record: {}", kill_err);
            }
            process::wait_gone(pid, Duration::from_secs(1));
            return Err(e.into());
        }

        tracing::info!(goal_id = %goal_id, pid, phase = %phase, "supervisor spawned");
        self.events.dispatch(&OverseerEvent::SupervisorSpawned {
            goal_id,
            pid,
            timestamp: Utc::now(),
        });
        Ok(pid)
    }

    /// Probe the recorded supervisor. A dead one is cleared as a side effect.
    pub fn is_alive(&self, goal_id: Uuid) -> Result<bool, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        let Some(pid) = goal.supervisor_pid else {
            return Ok(false);
        };
        if process::has_exited(pid) {
            self.release(goal_id, pid, "not running")?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Clear pids of exited supervisors for Active goals. Returns how many.
    pub fn reap_dead(&self) -> Result<usize, OrchestratorError> {
        let mut reaped = 0;
        for goal in self.store.list_goals_by_status(GoalStatus::Active)? {
            let Some(pid) = goal.supervisor_pid else {
                continue;
            };
            if process::has_exited(pid) {
                self.release(goal.id, pid, "reaped")?;
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::info!(reaped, "reaped dead supervisors");
        }
        Ok(reaped)
    }

    /// Stop the recorded supervisor and forget it. Leaves status alone.
    ///
    /// Bookkeeping is cleared even when signalling fails so a pid that can
    /// never be reaped is not left behind.
    pub(crate) fn terminate(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        let goal = self.goal(goal_id)?;
        let pid = goal
            .supervisor_pid
            .ok_or(OrchestratorError::NoSupervisor(goal_id))?;

        let outcome = process::terminate(pid, self.kill_grace);
        let reason = match &outcome {
            Ok(true) => "killed",
            Ok(false) => "already gone",
            Err(_) => "signal failed",
        };
        self.release(goal_id, pid, reason)?;
        if let Err(source) = outcome {
            tracing::warn!(goal_id = %goal_id, pid, "could not signal supervisor: {}", source);
        }
        Ok(self.goal(goal_id)?)
    }

    /// Terminate the supervisor (SIGTERM, grace, SIGKILL) and pause the goal.
    pub fn kill(&self, goal_id: Uuid) -> Result<Goal, OrchestratorError> {
        let goal = self.terminate(goal_id)?;
        if goal.status == GoalStatus::Paused || !goal.status.can_transition_to(GoalStatus::Paused) {
            if goal.status.is_terminal() {
                tracing::info!(goal_id = %goal_id, status = %goal.status, "supervisor killed; goal already terminal");
            }
            return Ok(goal);
        }
        let from = goal.status;
        let goal = self.store.update_goal_status(goal_id, GoalStatus::Paused)?;
        self.events
            .dispatch(&OverseerEvent::goal_status_changed(goal_id, from, GoalStatus::Paused));
        Ok(goal)
    }

    /// Start-up reconciliation: clear recorded pids that no longer exist
    /// or whose supervisor has stopped heartbeating. Returns how many.
    ///
    /// A live child of this process is the supervisor it launched, so the
    /// age rule never applies to it. For any other pid the age rule covers
    /// a pid reused by an unrelated process after a crash; a genuine
    /// supervisor heartbeats every tick and stays fresh.
    pub fn check_stale(&self) -> Result<usize, OrchestratorError> {
        let now = Utc::now();
        let mut cleared = 0;
        for goal in self.store.list_goals()? {
            let Some(pid) = goal.supervisor_pid else {
                continue;
            };
            let reason = match process::try_wait(pid) {
                process::WaitStatus::Exited => Some("process gone"),
                process::WaitStatus::Running => None,
                process::WaitStatus::NotChild if process::probe(pid) == process::Probe::Gone => {
                    Some("process gone")
                }
                process::WaitStatus::NotChild => {
                    match (self.stale_after, goal.supervisor_last_seen()) {
                        (Some(limit), Some(seen)) => {
                            let silent = now.signed_duration_since(seen);
                            let too_old = silent
                                .to_std()
                                .map(|silent| silent > limit)
                                .unwrap_or(false);
                            too_old.then_some("stale")
                        }
                        _ => None,
                    }
                }
            };
            if let Some(reason) = reason {
                self.release(goal.id, pid, reason)?;
                cleared += 1;
            }
        }
        if cleared > 0 {
            tracing::info!(cleared, "cleared stale supervisor records");
        }
        Ok(cleared)
    }

    /// Spawn supervisors for Active goals with no recorded pid (and
    /// Planning goals when enabled). Returns how many were spawned.
    pub fn respawn_dead(&self) -> Result<usize, OrchestratorError> {
        let mut spawned = 0;
        for goal in self.store.list_goals()? {
            let eligible = goal.status == GoalStatus::Active
                || (self.respawn_planning && goal.status == GoalStatus::Planning);
            if !eligible || goal.supervisor_pid.is_some() {
                continue;
            }
            match self.spawn(goal.id) {
                Ok(_) => spawned += 1,
                Err(e) => {
                    tracing::warn!(goal_id = %goal.id, "respawn failed: {}", e);
                }
            }
        }
        if spawned > 0 {
            tracing::info!(spawned, "respawned supervisors");
        }
        Ok(spawned)
    }
}
