//! # ovr-goal
//!
//! Goal/action data model, storage contract, and planning engine for
//! Overseer.
//!
//! A [`Goal`] declares the boolean assertions that must hold for it to be
//! done and accumulates a world state as work completes. [`Action`]s form
//! a tree under a goal; compound actions group children, primitive
//! actions are dispatched to workers once their preconditions hold.
//!
//! ## Key components
//!
//! - [`Goal`] / [`GoalStatus`]: Planning → Active ⇄ Paused → {Completed, Failed}
//! - [`Action`] / [`ActionStatus`]: Pending → Running → {Completed, Failed, Skipped}
//! - [`StateStore`]: storage contract; [`JsonStateStore`] (one file per
//!   record) and [`MemoryStateStore`]
//! - [`PlanningEngine`]: readiness, world-state merge, completion check,
//!   replanning
//! - [`OverseerEvent`] / [`EventDispatcher`]: lifecycle notifications

pub mod action;
pub mod assertions;
pub mod error;
pub mod events;
pub mod goal;
pub mod lock;
pub mod memory;
pub mod planning;
pub mod store;

pub use action::{Action, ActionSpec, ActionStatus, DEFAULT_ROLE};
pub use assertions::{assertion_map, assertion_set, AssertionMap, AssertionSet};
pub use error::GoalError;
pub use events::{read_event_log, EventDispatcher, LogSink, NotificationSink, OverseerEvent};
pub use goal::{Goal, GoalStatus};
pub use lock::FileLock;
pub use memory::MemoryStateStore;
pub use planning::{
    action_tree, check_progress, prerequisite_results, ready_actions, truncate_preview,
    ActionNode, EffectGap, PlanningEngine, Progress, TRUNCATION_MARKER,
};
pub use store::{ActionMutation, GoalMutation, JsonStateStore, StateStore};
