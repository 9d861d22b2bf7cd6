// error.rs — Error taxonomy for the orchestration layer.
//
// Every variant maps to a stable machine-readable code so front-ends can
// branch on the failure without parsing messages.

use ovr_goal::{GoalError, GoalStatus};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Unknown goal, action, work item, or tool.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A required request field was absent or empty.
    #[error("missing required parameter: {0}")]
    MissingParams(String),

    /// The operation is not valid for the record's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A status string outside the closed status set.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// The goal already has as many running actions as it may.
    #[error("capacity exceeded for goal {goal_id}: {running} running, limit {limit}")]
    CapacityExceeded {
        goal_id: Uuid,
        running: usize,
        limit: usize,
    },

    /// Kill requested but no supervisor is recorded.
    #[error("no supervisor recorded for goal {0}")]
    NoSupervisor(Uuid),

    /// Start requested while a supervisor is alive.
    #[error("supervisor already running for goal {goal_id} (pid {pid})")]
    SupervisorAlreadyRunning { goal_id: Uuid, pid: u32 },

    /// The goal is Completed or Failed.
    #[error("goal {goal_id} is in terminal state {status}")]
    TerminalState { goal_id: Uuid, status: GoalStatus },

    /// Storage failed underneath the operation.
    #[error("store error: {0}")]
    Store(GoalError),

    /// An OS process-control call failed.
    #[error("process error for pid {pid}: {source}")]
    Process { pid: u32, source: std::io::Error },

    /// A supervisor or worker could not be started.
    #[error("launch failed: {0}")]
    Launch(String),

    /// A file I/O operation outside the state store failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Stable code used at the JSON edge.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound { .. } => "not_found",
            OrchestratorError::MissingParams(_) => "missing_params",
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::InvalidStatus(_) => "invalid_status",
            OrchestratorError::CapacityExceeded { .. } => "capacity_exceeded",
            OrchestratorError::NoSupervisor(_) => "no_supervisor",
            OrchestratorError::SupervisorAlreadyRunning { .. } => "supervisor_already_running",
            OrchestratorError::TerminalState { .. } => "terminal_state",
            OrchestratorError::Store(_) => "store_error",
            OrchestratorError::Process { .. } => "process_error",
            OrchestratorError::Launch(_) => "launch_failed",
            OrchestratorError::Io { .. } => "io_error",
            OrchestratorError::Config(_) => "config_error",
        }
    }

    pub fn goal_not_found(id: Uuid) -> Self {
        OrchestratorError::NotFound {
            kind: "goal",
            id: id.to_string(),
        }
    }

    pub fn action_not_found(id: Uuid) -> Self {
        OrchestratorError::NotFound {
            kind: "action",
            id: id.to_string(),
        }
    }

    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        OrchestratorError::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl From<GoalError> for OrchestratorError {
    fn from(e: GoalError) -> Self {
        match e {
            GoalError::GoalNotFound(id) => OrchestratorError::goal_not_found(id),
            GoalError::ActionNotFound(id) => OrchestratorError::action_not_found(id),
            GoalError::InvalidStatus(s) => OrchestratorError::InvalidStatus(s),
            GoalError::InvalidTransition { .. } | GoalError::NotPending { .. } => {
                OrchestratorError::InvalidState(e.to_string())
            }
            other => OrchestratorError::Store(other),
        }
    }
}
