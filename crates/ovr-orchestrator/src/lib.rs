//! # ovr-orchestrator
//!
//! Dispatch, supervisor lifecycle, and the orchestration API for Overseer.
//!
//! The [`Orchestrator`] composes an [`ovr_goal::StateStore`], a
//! [`WorkerLauncher`] and a [`SupervisorManager`] into the operation set
//! exposed to callers; [`ToolRegistry`] puts a JSON edge on it.
//!
//! ## Key components
//!
//! - [`DispatchController`]: capacity-checked hand-off of ready actions
//! - [`SupervisorManager`]: spawn, liveness, kill, stale cleanup, respawn
//! - [`SupervisorLoop`]: the per-goal supervisor process body
//! - [`FileWorkQueue`] / [`run_worker`]: the worker side
//! - [`RolePrompts`]: per-role worker system prompts with project overrides
//! - [`OrchestratorConfig`]: `.overseer/` layout and `[orchestrator]` settings

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod launcher;
pub mod process;
pub mod queue;
pub mod registry;
pub mod role_prompts;
pub mod runner;
pub mod supervisor;
pub mod worker;

pub use api::{ActionResult, CreatedActions, GoalReport, GoalSummary, Orchestrator};
pub use config::{OrchestratorConfig, OrchestratorSettings, STATE_DIR};
pub use dispatch::{build_context, DispatchController, DispatchOutcome, WorkContext};
pub use error::OrchestratorError;
pub use launcher::{SelfExecLauncher, SupervisorLauncher, SupervisorPhase};
pub use queue::{FileWorkQueue, WorkItem, WorkItemStatus};
pub use registry::{error_body, Tool, ToolRegistry};
pub use role_prompts::RolePrompts;
pub use runner::{install_stop_handlers, run_worker, SupervisorExit, SupervisorLoop, WorkerRun};
pub use supervisor::SupervisorManager;
pub use worker::{ProcessWorkerLauncher, WorkOutcome, WorkerLauncher};
