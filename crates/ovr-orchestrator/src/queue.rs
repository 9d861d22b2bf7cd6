// queue.rs — FileWorkQueue: durable work items for worker processes.
//
// Layout: `<queues_dir>/<queue_name>/<work_item_id>.json`. Claiming takes
// an exclusive flock on `<queue_name>/.lock` so two workers never pick up
// the same item.
//
// Item status flow: pending → claimed → { done, failed }

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ovr_goal::{FileLock, GoalError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Claimed,
    Done,
    Failed,
}

/// One unit of work waiting for (or handled by) a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub queue: String,
    pub description: String,
    pub context: serde_json::Value,
    pub retry_budget: u32,
    #[serde(default)]
    pub attempts: u32,
    pub status: WorkItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Worker that claimed the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct FileWorkQueue {
    root: PathBuf,
}

impl FileWorkQueue {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn queue_dir(&self, queue: &str) -> Result<PathBuf, OrchestratorError> {
        // Queue names become directory names.
        if !is_safe_name(queue) {
            return Err(invalid_queue_name(queue));
        }
        let dir = self.root.join(queue);
        fs::create_dir_all(&dir).map_err(|e| OrchestratorError::io(dir.display(), e))?;
        Ok(dir)
    }

    fn lock(&self, dir: &Path) -> Result<FileLock, OrchestratorError> {
        Ok(FileLock::acquire(&dir.join(".lock"))?)
    }

    pub fn enqueue(
        &self,
        queue: &str,
        description: &str,
        context: serde_json::Value,
        retry_budget: u32,
    ) -> Result<WorkItem, OrchestratorError> {
        let dir = self.queue_dir(queue)?;
        let now = Utc::now();
        let item = WorkItem {
            id: Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            description: description.to_string(),
            context,
            retry_budget,
            attempts: 0,
            status: WorkItemStatus::Pending,
            result: None,
            worker_pid: None,
            created_at: now,
            updated_at: now,
        };
        let _lock = self.lock(&dir)?;
        write_item(&dir, &item)?;
        Ok(item)
    }

    pub fn get(&self, queue: &str, id: &str) -> Result<Option<WorkItem>, OrchestratorError> {
        let dir = self.queue_dir(queue)?;
        read_item(&item_path(&dir, id))
    }

    /// Delete an item. Returns whether it existed.
    pub fn remove(&self, queue: &str, id: &str) -> Result<bool, OrchestratorError> {
        let dir = self.queue_dir(queue)?;
        let _lock = self.lock(&dir)?;
        let path = item_path(&dir, id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(OrchestratorError::io(path.display(), e)),
        }
    }

    /// Every item in the queue, oldest first.
    pub fn list(&self, queue: &str) -> Result<Vec<WorkItem>, OrchestratorError> {
        let dir = self.queue_dir(queue)?;
        let entries = fs::read_dir(&dir).map_err(|e| OrchestratorError::io(dir.display(), e))?;
        let mut items = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| OrchestratorError::io(dir.display(), e))?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(item) = read_item(&path)? {
                    items.push(item);
                }
            }
        }
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    /// Claim the oldest pending item for `worker_pid`.
    pub fn claim_next(
        &self,
        queue: &str,
        worker_pid: u32,
    ) -> Result<Option<WorkItem>, OrchestratorError> {
        let dir = self.queue_dir(queue)?;
        let _lock = self.lock(&dir)?;
        let next = self
            .list(queue)?
            .into_iter()
            .find(|item| item.status == WorkItemStatus::Pending);
        let Some(mut item) = next else {
            return Ok(None);
        };
        item.status = WorkItemStatus::Claimed;
        item.worker_pid = Some(worker_pid);
        item.updated_at = Utc::now();
        write_item(&dir, &item)?;
        Ok(Some(item))
    }

    /// Record one more attempt on a claimed item.
    pub fn record_attempt(&self, queue: &str, id: &str) -> Result<WorkItem, OrchestratorError> {
        self.update(queue, id, |item| item.attempts += 1)
    }

    /// Store the final outcome of an item.
    pub fn finish(
        &self,
        queue: &str,
        id: &str,
        status: WorkItemStatus,
        result: String,
    ) -> Result<WorkItem, OrchestratorError> {
        self.update(queue, id, |item| {
            item.status = status;
            item.result = Some(result);
        })
    }

    fn update(
        &self,
        queue: &str,
        id: &str,
        mutate: impl FnOnce(&mut WorkItem),
    ) -> Result<WorkItem, OrchestratorError> {
        let dir = self.queue_dir(queue)?;
        let _lock = self.lock(&dir)?;
        let mut item = read_item(&item_path(&dir, id))?.ok_or_else(|| OrchestratorError::NotFound {
            kind: "work item",
            id: id.to_string(),
        })?;
        mutate(&mut item);
        item.updated_at = Utc::now();
        write_item(&dir, &item)?;
        Ok(item)
    }
}

/// Names used as path components (queues, role prompt files): non-empty
/// and made only of ASCII letters, digits, `_` and `-`.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub(crate) fn invalid_queue_name(queue: &str) -> OrchestratorError {
    OrchestratorError::InvalidState(format!(
        "invalid queue name '{}': use letters, digits, '_' or '-'",
        queue
    ))
}

fn item_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", id))
}

fn read_item(path: &Path) -> Result<Option<WorkItem>, OrchestratorError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(OrchestratorError::io(path.display(), e)),
    };
    Ok(Some(serde_json::from_str(&json).map_err(GoalError::from)?))
}

fn write_item(dir: &Path, item: &WorkItem) -> Result<(), OrchestratorError> {
    let path = item_path(dir, &item.id);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(item).map_err(GoalError::from)?;
    fs::write(&tmp, json).map_err(|e| OrchestratorError::io(tmp.display(), e))?;
    fs::rename(&tmp, &path).map_err(|e| OrchestratorError::io(path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn claim_takes_oldest_pending_once() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        let first = queue.enqueue("q", "first", json!({}), 3).unwrap();
        let second = queue.enqueue("q", "second", json!({}), 3).unwrap();

        let claimed = queue.claim_next("q", 100).unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.worker_pid, Some(100));
        let claimed = queue.claim_next("q", 101).unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(queue.claim_next("q", 102).unwrap().is_none());
    }

    #[test]
    fn concurrent_claims_never_share_an_item() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let queue = FileWorkQueue::new(&root);
        for i in 0..8 {
            queue.enqueue("q", &format!("item {i}"), json!({}), 1).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let queue = FileWorkQueue::new(&root);
                    let mut mine = Vec::new();
                    while let Some(item) = queue.claim_next("q", worker).unwrap() {
                        mine.push(item.id);
                    }
                    mine
                })
            })
            .collect();
        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 8);
    }

    #[test]
    fn finish_records_outcome_and_remove_rolls_back() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        let item = queue.enqueue("q", "x", json!({"k": 1}), 2).unwrap();
        queue.record_attempt("q", &item.id).unwrap();
        let done = queue
            .finish("q", &item.id, WorkItemStatus::Done, "output".into())
            .unwrap();
        assert_eq!(done.attempts, 1);
        assert_eq!(done.result.as_deref(), Some("output"));

        assert!(queue.remove("q", &item.id).unwrap());
        assert!(!queue.remove("q", &item.id).unwrap());
        assert!(queue.get("q", &item.id).unwrap().is_none());
    }

    #[test]
    fn queue_names_cannot_escape_the_root() {
        let dir = tempdir().unwrap();
        let queue = FileWorkQueue::new(dir.path());
        assert!(queue.enqueue("../evil", "x", json!({}), 1).is_err());
        assert!(queue.enqueue("", "x", json!({}), 1).is_err());
        assert!(queue.enqueue(".hidden", "x", json!({}), 1).is_err());
        assert!(queue.enqueue("a/b", "x", json!({}), 1).is_err());
    }

    #[test]
    fn safe_names_are_plain_identifiers() {
        for name in ["q", "builds", "goal_0f3a", "web-app-2"] {
            assert!(is_safe_name(name), "{name}");
        }
        for name in ["", "..", "../escape", "a/b", "a\\b", "x.y", "sp ace", "é"] {
            assert!(!is_safe_name(name), "{name}");
        }
    }
}
