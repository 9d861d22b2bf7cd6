// config.rs — Orchestrator configuration.
//
// OrchestratorConfig fixes where state lives: goal and action records,
// work queues, supervisor/worker logs, role prompt overrides, and the
// event log. `for_project()`
// lays these out under `.overseer/` in the project root; tunables come
// from the `[orchestrator]` table of `.overseer/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".overseer";

/// Paths plus tunables for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root directory of the project.
    pub project_root: PathBuf,

    /// Root of the state store (`goals/` and `actions/` live below it).
    pub store_dir: PathBuf,

    /// One subdirectory per work queue.
    pub queues_dir: PathBuf,

    /// Supervisor and worker stderr logs.
    pub logs_dir: PathBuf,

    /// Lifecycle event log (JSONL).
    pub events_log: PathBuf,

    /// `<role>.md` files overriding the built-in worker prompts.
    pub prompts_dir: PathBuf,

    /// Location of the TOML settings file.
    pub config_file: PathBuf,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

/// Tunables read from the `[orchestrator]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Running actions allowed per goal before dispatch refuses.
    #[serde(default = "default_max_workers_per_goal")]
    pub max_workers_per_goal: usize,

    /// Grace window between SIGTERM and SIGKILL.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Age after which a recorded supervisor is considered stale at
    /// start-up. `0` disables the age check.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Attempts a worker makes on one work item.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Characters of a prerequisite result handed to workers.
    #[serde(default = "default_result_preview_chars")]
    pub result_preview_chars: usize,

    /// Supervisor loop and `watch` polling period.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Shell command a worker runs for each work item. Receives the
    /// context JSON on stdin.
    #[serde(default)]
    pub worker_command: Option<String>,

    /// Also respawn supervisors for goals still in Planning.
    #[serde(default)]
    pub respawn_planning: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_workers_per_goal: default_max_workers_per_goal(),
            kill_grace_ms: default_kill_grace_ms(),
            stale_after_secs: default_stale_after_secs(),
            retry_budget: default_retry_budget(),
            result_preview_chars: default_result_preview_chars(),
            poll_interval_ms: default_poll_interval_ms(),
            worker_command: None,
            respawn_planning: false,
        }
    }
}

// Serde default functions
fn default_max_workers_per_goal() -> usize {
    3
}

fn default_kill_grace_ms() -> u64 {
    100
}

fn default_stale_after_secs() -> u64 {
    3600
}

fn default_retry_budget() -> u32 {
    3
}

fn default_result_preview_chars() -> usize {
    4000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl OrchestratorSettings {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }
}

/// On-disk shape of `config.toml`.
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    orchestrator: OrchestratorSettings,
}

impl OrchestratorConfig {
    /// Standard `.overseer/` layout with default settings.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let state_dir = root.join(STATE_DIR);
        Self {
            project_root: root,
            store_dir: state_dir.clone(),
            queues_dir: state_dir.join("queues"),
            logs_dir: state_dir.join("logs"),
            events_log: state_dir.join("events.jsonl"),
            prompts_dir: state_dir.join("prompts"),
            config_file: state_dir.join("config.toml"),
            orchestrator: OrchestratorSettings::default(),
        }
    }

    /// Standard layout with settings read from `config.toml`.
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let mut config = Self::for_project(project_root);
        match std::fs::read_to_string(&config.config_file) {
            Ok(content) => {
                let file: SettingsFile = toml::from_str(&content).map_err(|e| {
                    OrchestratorError::Config(format!(
                        "{}: {}",
                        config.config_file.display(),
                        e
                    ))
                })?;
                config.orchestrator = file.orchestrator;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(OrchestratorError::io(config.config_file.display(), source));
            }
        }
        Ok(config)
    }

    /// Try to load config, falling back to defaults on any error.
    pub fn load_or_default(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref();
        Self::load(root).unwrap_or_else(|e| {
            tracing::warn!("ignoring unreadable config: {}", e);
            Self::for_project(root)
        })
    }
}
