// launcher.rs — Starting supervisor processes.
//
// A supervisor is the same executable re-invoked in the `supervise` role
// for one goal. The launcher is a trait so orchestration logic can be
// exercised without forking anything.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;

use ovr_goal::{Goal, GoalStatus};

use crate::error::OrchestratorError;

/// Which half of the loop a supervisor starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    /// The goal is still Planning: wait for actions, then promote.
    Plan,
    /// Drive dispatch/merge/check until done.
    Execute,
}

impl SupervisorPhase {
    pub fn for_status(status: GoalStatus) -> Self {
        if status == GoalStatus::Planning {
            SupervisorPhase::Plan
        } else {
            SupervisorPhase::Execute
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorPhase::Plan => "plan",
            SupervisorPhase::Execute => "execute",
        }
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupervisorPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(SupervisorPhase::Plan),
            "execute" => Ok(SupervisorPhase::Execute),
            other => Err(format!("unknown phase '{}' (expected plan or execute)", other)),
        }
    }
}

/// Starts one supervisor process for a goal and returns its pid.
pub trait SupervisorLauncher: Send + Sync {
    fn launch(&self, goal: &Goal, phase: SupervisorPhase) -> Result<u32, OrchestratorError>;
}

/// Re-executes the current binary as `<exe> --project-root <root>
/// supervise --goal <id> --phase <phase>`.
///
/// stdin/stdout are detached and stderr is appended to
/// `logs/supervisor-<goal>.log`. The child gets its own process group so
/// a Ctrl-C at the front-end does not take supervisors down with it.
pub struct SelfExecLauncher {
    exe: PathBuf,
    project_root: PathBuf,
    logs_dir: PathBuf,
}

impl SelfExecLauncher {
    pub fn new(exe: PathBuf, project_root: PathBuf, logs_dir: PathBuf) -> Self {
        Self {
            exe,
            project_root,
            logs_dir,
        }
    }

    /// Launcher bound to the running executable.
    pub fn current(project_root: PathBuf, logs_dir: PathBuf) -> Result<Self, OrchestratorError> {
        let exe = std::env::current_exe()
            .map_err(|e| OrchestratorError::Launch(format!("cannot locate own executable: {}", e)))?;
        Ok(Self::new(exe, project_root, logs_dir))
    }
}

/// Open (append) a role log for a child's stderr.
pub(crate) fn open_role_log(
    logs_dir: &std::path::Path,
    file_name: &str,
) -> Result<fs::File, OrchestratorError> {
    fs::create_dir_all(logs_dir).map_err(|e| OrchestratorError::io(logs_dir.display(), e))?;
    let path = logs_dir.join(file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| OrchestratorError::io(path.display(), e))
}

impl SupervisorLauncher for SelfExecLauncher {
    fn launch(&self, goal: &Goal, phase: SupervisorPhase) -> Result<u32, OrchestratorError> {
        let log = open_role_log(&self.logs_dir, &format!("supervisor-{}.log", goal.id))?;
        let child = Command::new(&self.exe)
            .arg("--project-root")
            .arg(&self.project_root)
            .arg("supervise")
            .arg("--goal")
            .arg(goal.id.to_string())
            .arg("--phase")
            .arg(phase.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .process_group(0)
            .spawn()
            .map_err(|e| {
                OrchestratorError::Launch(format!(
                    "failed to spawn supervisor for goal {}: {}",
                    goal.id, e
                ))
            })?;
        // The Child handle is dropped without waiting; reaping goes through
        // waitpid in the supervisor manager.
        Ok(child.id())
    }
}
