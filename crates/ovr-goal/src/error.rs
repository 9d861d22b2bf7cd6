// error.rs — Error types for the goal/action model and its stores.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while reading or mutating goals and actions.
#[derive(Debug, Error)]
pub enum GoalError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize a goal or action record.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The requested goal was not found.
    #[error("goal not found: {0}")]
    GoalNotFound(Uuid),

    /// The requested action was not found.
    #[error("action not found: {0}")]
    ActionNotFound(Uuid),

    /// A status transition outside the allowed graph.
    #[error("invalid transition from {from} to {to} for {record} {id}")]
    InvalidTransition {
        record: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    /// Dispatch raced with another change to the action.
    #[error("action {id} is not pending (status: {status})")]
    NotPending { id: Uuid, status: String },

    /// A status name that is not part of the closed status set.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// A notification dispatch failed (non-fatal).
    #[error("notification error: {0}")]
    NotificationError(String),
}

impl GoalError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        GoalError::IoError {
            path: path.to_string(),
            source,
        }
    }
}
