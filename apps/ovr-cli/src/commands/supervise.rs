// supervise.rs — Supervisor role: drive one goal until it completes, is
// paused or cancelled, or the process is signalled.

use uuid::Uuid;

use ovr_orchestrator::{
    install_stop_handlers, Orchestrator, OrchestratorConfig, SupervisorLoop, SupervisorPhase,
};

/// Run the loop and return the process exit code.
pub fn execute(config: &OrchestratorConfig, goal_id: Uuid, phase: SupervisorPhase) -> anyhow::Result<i32> {
    let stop = install_stop_handlers();
    let orch = Orchestrator::open(config)?;
    let exit = SupervisorLoop::new(&orch, goal_id, phase, stop).run();
    Ok(exit.exit_code())
}
