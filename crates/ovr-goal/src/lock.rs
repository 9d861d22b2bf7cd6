// lock.rs — Advisory file lock shared by every process touching a store.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::GoalError;

/// Exclusive `flock` held until the guard is dropped.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the lock on `path` (created if missing) is ours.
    pub fn acquire(path: &Path) -> Result<Self, GoalError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| GoalError::io(path.display(), source))?;
        // Safety: the fd is owned by `file` and stays open for the guard's lifetime.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(GoalError::io(
                path.display(),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Safety: see `acquire`. Closing the fd would release it as well.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
