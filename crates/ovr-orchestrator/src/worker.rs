// worker.rs — Worker launch interface and its process-backed implementation.
//
// Dispatch talks to workers only through `WorkerLauncher`: enqueue a work
// item, start a worker bound to the queue, and later ask how the item
// went. `ProcessWorkerLauncher` backs this with a FileWorkQueue and
// re-executes the binary in the `work` role.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::launcher::open_role_log;
use crate::process;
use crate::queue::{FileWorkQueue, WorkItemStatus};

/// What became of a dispatched work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Still queued or being worked on.
    InProgress,
    Done(String),
    Failed(String),
    /// The item vanished or its worker died holding it.
    Lost(String),
}

/// Enqueues work and starts worker processes.
pub trait WorkerLauncher: Send + Sync {
    /// Store a work item on `queue`. Returns the work item id.
    fn enqueue_work_item(
        &self,
        queue: &str,
        description: &str,
        context: &serde_json::Value,
        retry_budget: u32,
    ) -> Result<String, OrchestratorError>;

    /// Start a worker bound to `queue`. Returns its pid.
    fn spawn_worker(&self, queue: &str) -> Result<u32, OrchestratorError>;

    /// Undo an enqueue whose worker never started or was withdrawn.
    fn remove_work_item(&self, queue: &str, work_item_id: &str) -> Result<(), OrchestratorError>;

    /// Stop a worker whose dispatch was withdrawn.
    fn stop_worker(&self, pid: u32) -> Result<(), OrchestratorError>;

    fn poll_work_item(
        &self,
        queue: &str,
        work_item_id: &str,
    ) -> Result<WorkOutcome, OrchestratorError>;
}

pub struct ProcessWorkerLauncher {
    queue: FileWorkQueue,
    exe: PathBuf,
    project_root: PathBuf,
    logs_dir: PathBuf,
    kill_grace: Duration,
}

impl ProcessWorkerLauncher {
    pub fn new(queue: FileWorkQueue, exe: PathBuf, project_root: PathBuf, logs_dir: PathBuf) -> Self {
        Self {
            queue,
            exe,
            project_root,
            logs_dir,
            kill_grace: Duration::from_millis(100),
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn current(
        queue: FileWorkQueue,
        project_root: PathBuf,
        logs_dir: PathBuf,
    ) -> Result<Self, OrchestratorError> {
        let exe = std::env::current_exe()
            .map_err(|e| OrchestratorError::Launch(format!("cannot locate own executable: {}", e)))?;
        Ok(Self::new(queue, exe, project_root, logs_dir))
    }
}

impl WorkerLauncher for ProcessWorkerLauncher {
    fn enqueue_work_item(
        &self,
        queue: &str,
        description: &str,
        context: &serde_json::Value,
        retry_budget: u32,
    ) -> Result<String, OrchestratorError> {
        let item = self
            .queue
            .enqueue(queue, description, context.clone(), retry_budget)?;
        tracing::debug!(queue, work_item_id = %item.id, "work item enqueued");
        Ok(item.id)
    }

    fn spawn_worker(&self, queue: &str) -> Result<u32, OrchestratorError> {
        let log = open_role_log(&self.logs_dir, &format!("worker-{}.log", queue))?;
        let child = Command::new(&self.exe)
            .arg("--project-root")
            .arg(&self.project_root)
            .arg("work")
            .arg("--queue")
            .arg(queue)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .process_group(0)
            .spawn()
            .map_err(|e| {
                OrchestratorError::Launch(format!("failed to spawn worker for {}: {}", queue, e))
            })?;
        Ok(child.id())
    }

    fn remove_work_item(&self, queue: &str, work_item_id: &str) -> Result<(), OrchestratorError> {
        self.queue.remove(queue, work_item_id)?;
        Ok(())
    }

    fn stop_worker(&self, pid: u32) -> Result<(), OrchestratorError> {
        process::terminate(pid, self.kill_grace)
            .map_err(|source| OrchestratorError::Process { pid, source })?;
        Ok(())
    }

    fn poll_work_item(
        &self,
        queue: &str,
        work_item_id: &str,
    ) -> Result<WorkOutcome, OrchestratorError> {
        let Some(item) = self.queue.get(queue, work_item_id)? else {
            return Ok(WorkOutcome::Lost(format!("work item {} disappeared", work_item_id)));
        };
        Ok(match item.status {
            WorkItemStatus::Pending => WorkOutcome::InProgress,
            WorkItemStatus::Claimed => match item.worker_pid {
                Some(pid) if process::probe(pid) == process::Probe::Gone => WorkOutcome::Lost(
                    format!("worker {} exited without finishing {}", pid, work_item_id),
                ),
                _ => WorkOutcome::InProgress,
            },
            WorkItemStatus::Done => WorkOutcome::Done(item.result.unwrap_or_default()),
            WorkItemStatus::Failed => WorkOutcome::Failed(item.result.unwrap_or_default()),
        })
    }
}
