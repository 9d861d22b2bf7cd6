// watch.rs — Keep supervisors alive: reap dead records and respawn
// supervisors for goals that have none, once per poll interval.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use ovr_orchestrator::{install_stop_handlers, Orchestrator};

pub fn execute(orch: &Orchestrator, once: bool) -> anyhow::Result<()> {
    let stop = install_stop_handlers();
    let interval = orch.settings().poll_interval();
    tracing::info!(interval_ms = interval.as_millis() as u64, "watching supervisors");

    loop {
        let reaped = orch.supervisors().reap_dead()?;
        let respawned = orch.supervisors().respawn_dead()?;
        if reaped + respawned > 0 {
            tracing::info!(reaped, respawned, "supervisor sweep");
        }
        if once {
            println!("Reaped {}, respawned {}.", reaped, respawned);
            return Ok(());
        }

        let mut waited = Duration::ZERO;
        while waited < interval {
            if stop.load(Ordering::SeqCst) {
                tracing::info!("watch stopped");
                return Ok(());
            }
            let step = (interval - waited).min(Duration::from_millis(100));
            thread::sleep(step);
            waited += step;
        }
    }
}
