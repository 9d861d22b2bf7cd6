// action.rs — Action: one unit of work under a goal.
//
// Compound actions group children and are never handed to a worker.
// Primitive actions are dispatched. Status flow:
//   Pending → Running → { Completed, Failed }
//   Pending → { Completed, Failed, Skipped }   (caller-driven, e.g. compounds)
//   Running → Pending                          (worker lost, re-dispatch)
//   Failed  → Pending                          (retry, bumps attempt_count)

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assertions::AssertionSet;
use crate::error::GoalError;

/// Role used when an `ActionSpec` does not name one.
pub const DEFAULT_ROLE: &str = "implementation";

/// The lifecycle status of an Action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 5] = [
        ActionStatus::Pending,
        ActionStatus::Running,
        ActionStatus::Completed,
        ActionStatus::Failed,
        ActionStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Skipped
        )
    }

    /// Check whether moving from this status to `next` is allowed.
    ///
    /// Re-asserting the current status is allowed; it may carry a new result.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (ActionStatus::Pending, ActionStatus::Running)
                | (ActionStatus::Pending, ActionStatus::Completed)
                | (ActionStatus::Pending, ActionStatus::Failed)
                | (ActionStatus::Pending, ActionStatus::Skipped)
                | (ActionStatus::Running, ActionStatus::Completed)
                | (ActionStatus::Running, ActionStatus::Failed)
                | (ActionStatus::Running, ActionStatus::Pending)
                | (ActionStatus::Failed, ActionStatus::Pending)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = GoalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GoalError::InvalidStatus(s.to_string()))
    }
}

/// Everything a caller supplies to create one action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionSpec {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_action_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub is_compound: bool,
    #[serde(default)]
    pub preconditions: AssertionSet,
    #[serde(default)]
    pub effects: AssertionSet,
}

/// An Action record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,

    /// Owning goal. Never changes after creation.
    pub goal_id: Uuid,

    /// Present only for children of a compound action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_action_id: Option<Uuid>,

    pub description: String,

    /// Worker specialization tag.
    pub role: String,

    pub is_compound: bool,

    /// Assertions that must all be true in world state before this may run.
    #[serde(default)]
    pub preconditions: AssertionSet,

    /// Assertions this action is declared to make true.
    #[serde(default)]
    pub effects: AssertionSet,

    pub status: ActionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default)]
    pub attempt_count: u32,

    /// Work item created when this action was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    /// Create a new Pending action for `goal_id` from a spec.
    pub fn new(goal_id: Uuid, spec: ActionSpec) -> Self {
        let now = Utc::now();
        let role = spec
            .role
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());
        Self {
            id: Uuid::new_v4(),
            goal_id,
            parent_action_id: spec.parent_action_id,
            description: spec.description,
            role,
            is_compound: spec.is_compound,
            preconditions: spec.preconditions,
            effects: spec.effects,
            status: ActionStatus::Pending,
            result: None,
            attempt_count: 0,
            work_item_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, optionally replacing the result text.
    ///
    /// A `Failed → Pending` retry increments `attempt_count`.
    pub fn transition(
        &mut self,
        next: ActionStatus,
        result: Option<String>,
    ) -> Result<(), GoalError> {
        if !self.status.can_transition_to(next) {
            return Err(GoalError::InvalidTransition {
                record: "action",
                id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if self.status == ActionStatus::Failed && next == ActionStatus::Pending {
            self.attempt_count += 1;
        }
        self.status = next;
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::assertion_set;

    fn primitive() -> Action {
        Action::new(
            Uuid::new_v4(),
            ActionSpec {
                description: "Write the parser".into(),
                effects: assertion_set(["parser_written"]),
                ..ActionSpec::default()
            },
        )
    }

    #[test]
    fn new_action_defaults() {
        let action = primitive();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.role, DEFAULT_ROLE);
        assert!(!action.is_compound);
        assert_eq!(action.attempt_count, 0);
        assert!(action.result.is_none());
    }

    #[test]
    fn blank_role_falls_back_to_default() {
        let action = Action::new(
            Uuid::new_v4(),
            ActionSpec {
                description: "x".into(),
                role: Some("  ".into()),
                ..ActionSpec::default()
            },
        );
        assert_eq!(action.role, DEFAULT_ROLE);
    }

    #[test]
    fn dispatch_and_complete() {
        let mut action = primitive();
        action.transition(ActionStatus::Running, None).unwrap();
        action
            .transition(ActionStatus::Completed, Some("done".into()))
            .unwrap();
        assert_eq!(action.result.as_deref(), Some("done"));
    }

    #[test]
    fn retry_after_failure_counts_attempts() {
        let mut action = primitive();
        action.transition(ActionStatus::Running, None).unwrap();
        action
            .transition(ActionStatus::Failed, Some("boom".into()))
            .unwrap();
        action.transition(ActionStatus::Pending, None).unwrap();
        assert_eq!(action.attempt_count, 1);
        // The previous failure text stays until a new result arrives.
        assert_eq!(action.result.as_deref(), Some("boom"));
    }

    #[test]
    fn skipped_and_completed_are_final() {
        let mut skipped = primitive();
        skipped.transition(ActionStatus::Skipped, None).unwrap();
        assert!(skipped.transition(ActionStatus::Pending, None).is_err());

        let mut completed = primitive();
        completed.transition(ActionStatus::Completed, None).unwrap();
        assert!(completed.transition(ActionStatus::Running, None).is_err());
        // Re-asserting Completed may attach a result.
        completed
            .transition(ActionStatus::Completed, Some("late".into()))
            .unwrap();
    }

    #[test]
    fn status_parses_from_wire_names() {
        assert_eq!(
            "running".parse::<ActionStatus>().unwrap(),
            ActionStatus::Running
        );
        assert!(matches!(
            "done".parse::<ActionStatus>(),
            Err(GoalError::InvalidStatus(_))
        ));
    }
}
