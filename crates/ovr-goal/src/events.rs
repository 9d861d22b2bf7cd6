// events.rs — Lifecycle events and notification dispatch.
//
// The orchestrator emits an event whenever a goal or action changes in a
// way an observer might care about. Sinks subscribe through the
// dispatcher; a failing sink is logged and never fails the operation that
// produced the event.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionStatus;
use crate::assertions::AssertionMap;
use crate::error::GoalError;
use crate::goal::GoalStatus;

/// Events emitted at goal/action/supervisor lifecycle points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum OverseerEvent {
    GoalCreated {
        goal_id: Uuid,
        name: String,
        queue_name: String,
        timestamp: DateTime<Utc>,
    },

    GoalStatusChanged {
        goal_id: Uuid,
        from_status: GoalStatus,
        to_status: GoalStatus,
        timestamp: DateTime<Utc>,
    },

    /// A batch of actions was inserted under a goal.
    ActionsCreated {
        goal_id: Uuid,
        action_ids: Vec<Uuid>,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    ActionStatusChanged {
        goal_id: Uuid,
        action_id: Uuid,
        from_status: ActionStatus,
        to_status: ActionStatus,
        timestamp: DateTime<Utc>,
    },

    /// A primitive action was handed to a worker.
    ActionDispatched {
        goal_id: Uuid,
        action_id: Uuid,
        work_item_id: String,
        worker_pid: u32,
        timestamp: DateTime<Utc>,
    },

    WorldStateUpdated {
        goal_id: Uuid,
        assertions: AssertionMap,
        timestamp: DateTime<Utc>,
    },

    SupervisorSpawned {
        goal_id: Uuid,
        pid: u32,
        timestamp: DateTime<Utc>,
    },

    /// A recorded supervisor pid was dropped (killed, reaped, or stale).
    SupervisorCleared {
        goal_id: Uuid,
        pid: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl OverseerEvent {
    pub fn event_type(&self) -> &str {
        match self {
            OverseerEvent::GoalCreated { .. } => "goal_created",
            OverseerEvent::GoalStatusChanged { .. } => "goal_status_changed",
            OverseerEvent::ActionsCreated { .. } => "actions_created",
            OverseerEvent::ActionStatusChanged { .. } => "action_status_changed",
            OverseerEvent::ActionDispatched { .. } => "action_dispatched",
            OverseerEvent::WorldStateUpdated { .. } => "world_state_updated",
            OverseerEvent::SupervisorSpawned { .. } => "supervisor_spawned",
            OverseerEvent::SupervisorCleared { .. } => "supervisor_cleared",
        }
    }

    pub fn goal_id(&self) -> Uuid {
        match self {
            OverseerEvent::GoalCreated { goal_id, .. }
            | OverseerEvent::GoalStatusChanged { goal_id, .. }
            | OverseerEvent::ActionsCreated { goal_id, .. }
            | OverseerEvent::ActionStatusChanged { goal_id, .. }
            | OverseerEvent::ActionDispatched { goal_id, .. }
            | OverseerEvent::WorldStateUpdated { goal_id, .. }
            | OverseerEvent::SupervisorSpawned { goal_id, .. }
            | OverseerEvent::SupervisorCleared { goal_id, .. } => *goal_id,
        }
    }

    pub fn goal_created(goal_id: Uuid, name: &str, queue_name: &str) -> Self {
        OverseerEvent::GoalCreated {
            goal_id,
            name: name.to_string(),
            queue_name: queue_name.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn goal_status_changed(goal_id: Uuid, from: GoalStatus, to: GoalStatus) -> Self {
        OverseerEvent::GoalStatusChanged {
            goal_id,
            from_status: from,
            to_status: to,
            timestamp: Utc::now(),
        }
    }

    pub fn action_status_changed(
        goal_id: Uuid,
        action_id: Uuid,
        from: ActionStatus,
        to: ActionStatus,
    ) -> Self {
        OverseerEvent::ActionStatusChanged {
            goal_id,
            action_id,
            from_status: from,
            to_status: to,
            timestamp: Utc::now(),
        }
    }

    pub fn supervisor_cleared(goal_id: Uuid, pid: u32, reason: &str) -> Self {
        OverseerEvent::SupervisorCleared {
            goal_id,
            pid,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives lifecycle events.
pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the system.
    fn send(&self, event: &OverseerEvent) -> Result<(), GoalError>;
}

/// Appends events as JSONL to a file.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &OverseerEvent) -> Result<(), GoalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| GoalError::io(parent.display(), source))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| GoalError::io(self.path.display(), source))?;

        // One write per line keeps concurrent appenders from interleaving.
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .map_err(|source| GoalError::io(self.path.display(), source))?;
        Ok(())
    }
}

/// Fans events out to every registered sink.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, event: &OverseerEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(event = event.event_type(), "notification sink error: {}", e);
            }
        }
    }
}

/// Read back a JSONL event log. Lines that fail to parse are skipped.
pub fn read_event_log(path: &Path) -> Result<Vec<OverseerEvent>, GoalError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(GoalError::io(path.display(), source)),
    };
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
