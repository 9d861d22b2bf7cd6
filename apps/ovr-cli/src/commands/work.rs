// work.rs — Worker role: claim one item from a queue and run it.

use ovr_orchestrator::{run_worker, FileWorkQueue, OrchestratorConfig, WorkerRun};

pub fn execute(config: &OrchestratorConfig, queue_name: &str) -> anyhow::Result<()> {
    let queue = FileWorkQueue::new(&config.queues_dir);
    match run_worker(&queue, queue_name, &config.orchestrator)? {
        WorkerRun::Idle => tracing::debug!(queue = queue_name, "worker found nothing to do"),
        WorkerRun::Finished {
            work_item_id,
            status,
        } => tracing::debug!(queue = queue_name, %work_item_id, ?status, "worker done"),
    }
    Ok(())
}
