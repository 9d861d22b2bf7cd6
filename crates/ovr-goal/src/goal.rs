// goal.rs — Goal: a named target world state plus its lifecycle.
//
// A Goal declares the assertions that must all become true (goal_state)
// and accumulates what has been observed true so far (world_state). The
// supervisor bookkeeping (pid + start time) lives on the goal record so a
// fresh process can tell whether a supervisor is still around.
//
// The state machine:
//   Planning → Active ⇄ Paused → { Completed, Failed }
//   Planning → Paused (supervisor killed before promotion)
//   Planning/Active/Paused → Failed (cancel)

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assertions::AssertionMap;
use crate::error::GoalError;

/// The lifecycle status of a Goal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Created; actions may still be under construction.
    Planning,
    /// A supervisor is (or should be) driving the goal.
    Active,
    /// Supervisor stopped on purpose; can be resumed.
    Paused,
    /// Every goal-state assertion held.
    Completed,
    /// Cancelled or gave up.
    Failed,
}

impl GoalStatus {
    pub const ALL: [GoalStatus; 5] = [
        GoalStatus::Planning,
        GoalStatus::Active,
        GoalStatus::Paused,
        GoalStatus::Completed,
        GoalStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Planning => "planning",
            GoalStatus::Active => "active",
            GoalStatus::Paused => "paused",
            GoalStatus::Completed => "completed",
            GoalStatus::Failed => "failed",
        }
    }

    /// Completed and Failed accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GoalStatus::Completed | GoalStatus::Failed)
    }

    /// Statuses in which a supervisor process may run.
    pub fn allows_supervisor(&self) -> bool {
        matches!(self, GoalStatus::Planning | GoalStatus::Active)
    }

    /// Check whether moving from this status to `next` is allowed.
    ///
    /// Staying in the same status is always allowed for non-terminal
    /// statuses so that repeated pause/kill calls are idempotent.
    pub fn can_transition_to(&self, next: GoalStatus) -> bool {
        if *self == next {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (GoalStatus::Planning, GoalStatus::Active)
                | (GoalStatus::Planning, GoalStatus::Paused)
                | (GoalStatus::Planning, GoalStatus::Failed)
                | (GoalStatus::Active, GoalStatus::Paused)
                | (GoalStatus::Active, GoalStatus::Completed)
                | (GoalStatus::Active, GoalStatus::Failed)
                | (GoalStatus::Paused, GoalStatus::Active)
                | (GoalStatus::Paused, GoalStatus::Failed)
        )
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalStatus {
    type Err = GoalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GoalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GoalError::InvalidStatus(s.to_string()))
    }
}

/// A Goal: the completion criteria and accumulated truth for one objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier, generated at creation.
    pub id: Uuid,

    /// Short label (e.g., "Build small app").
    pub name: String,

    /// Free-text description of what the goal achieves.
    pub description: String,

    /// Assertions that must all be true for the goal to be complete.
    /// Nothing mutates this after creation.
    pub goal_state: AssertionMap,

    /// Assertions observed so far. Starts empty.
    #[serde(default)]
    pub world_state: AssertionMap,

    /// Optional progress note set by the orchestration layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Current lifecycle status.
    pub status: GoalStatus,

    /// Work queue used by this goal's workers.
    pub queue_name: String,

    /// Process id of the recorded supervisor, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_pid: Option<u32>,

    /// When the recorded supervisor was spawned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_started_at: Option<DateTime<Utc>>,

    /// Last tick of the recorded supervisor. Staleness is measured from
    /// here, falling back to the start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_heartbeat_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Create a new Goal in the Planning status.
    ///
    /// When `queue_name` is `None` a queue name is derived from a fresh
    /// UUID (`goal_<32 hex chars>`).
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        goal_state: AssertionMap,
        queue_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let queue_name =
            queue_name.unwrap_or_else(|| format!("goal_{}", Uuid::new_v4().simple()));
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            goal_state,
            world_state: AssertionMap::new(),
            summary: None,
            status: GoalStatus::Planning,
            queue_name,
            supervisor_pid: None,
            supervisor_started_at: None,
            supervisor_heartbeat_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`. Returns an error if the transition is invalid.
    pub fn transition(&mut self, next: GoalStatus) -> Result<(), GoalError> {
        if !self.status.can_transition_to(next) {
            return Err(GoalError::InvalidTransition {
                record: "goal",
                id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Record a freshly spawned supervisor.
    pub fn set_supervisor(&mut self, pid: u32, started_at: DateTime<Utc>) {
        self.supervisor_pid = Some(pid);
        self.supervisor_started_at = Some(started_at);
        self.supervisor_heartbeat_at = None;
        self.touch();
    }

    /// Note that the recorded supervisor is still ticking.
    pub fn heartbeat(&mut self, at: DateTime<Utc>) {
        self.supervisor_heartbeat_at = Some(at);
    }

    /// When the recorded supervisor last showed signs of life.
    pub fn supervisor_last_seen(&self) -> Option<DateTime<Utc>> {
        self.supervisor_heartbeat_at.or(self.supervisor_started_at)
    }

    /// Forget the recorded supervisor.
    pub fn clear_supervisor(&mut self) {
        self.supervisor_pid = None;
        self.supervisor_started_at = None;
        self.supervisor_heartbeat_at = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
