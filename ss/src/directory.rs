//! Exclusive ownership of per-task state directories
//!
//! Each task gets `{root}/{task}/`, guarded by an advisory lock on
//! `{root}/{task}/.lock`. Acquisition never waits: a held lock fails
//! immediately with `StoreError::Locked`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Name of the lock file inside a task directory
pub const LOCK_FILE_NAME: &str = ".lock";

/// Root directory holding one subdirectory per task
#[derive(Debug, Clone)]
pub struct StateDirectory {
    root: PathBuf,
}

impl StateDirectory {
    /// Open or create the state root
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        debug!(root = %root.display(), "StateDirectory::open: called");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory for a task (not created)
    pub fn task_dir(&self, task: &str) -> PathBuf {
        self.root.join(task)
    }

    /// Take exclusive ownership of a task directory, creating it if needed
    pub fn lock(&self, task: &str) -> Result<DirectoryLock, StoreError> {
        let dir = self.task_dir(task);
        debug!(%task, dir = %dir.display(), "StateDirectory::lock: called");
        fs::create_dir_all(&dir)?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE_NAME))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                debug!(%task, "StateDirectory::lock: lock held by another owner");
                return Err(StoreError::Locked { path: dir });
            }
            return Err(StoreError::Io(e));
        }

        info!(%task, dir = %dir.display(), "Acquired state directory lock");
        Ok(DirectoryLock { dir, file: Some(file) })
    }
}

/// Guard over a locked task directory; released on `unlock` or drop
#[derive(Debug)]
pub struct DirectoryLock {
    dir: PathBuf,
    file: Option<File>,
}

impl DirectoryLock {
    /// The locked task directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Release the lock explicitly, reporting any failure
    pub fn unlock(mut self) -> Result<(), StoreError> {
        debug!(dir = %self.dir.display(), "DirectoryLock::unlock: called");
        self.release()
    }

    fn release(&mut self) -> Result<(), StoreError> {
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file)?;
            info!(dir = %self.dir.display(), "Released state directory lock");
        }
        Ok(())
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(dir = %self.dir.display(), error = %e, "Failed to release state directory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_is_exclusive() {
        let temp = tempdir().unwrap();
        let dir = StateDirectory::open(temp.path()).unwrap();

        let held = dir.lock("0_1").unwrap();
        assert!(held.dir().join(LOCK_FILE_NAME).exists());

        let err = dir.lock("0_1").unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
    }

    #[test]
    fn test_lock_released_on_unlock_and_drop() {
        let temp = tempdir().unwrap();
        let dir = StateDirectory::open(temp.path()).unwrap();

        let held = dir.lock("0_1").unwrap();
        held.unlock().unwrap();
        let again = dir.lock("0_1").unwrap();
        drop(again);
        dir.lock("0_1").unwrap();
    }

    #[test]
    fn test_distinct_tasks_lock_independently() {
        let temp = tempdir().unwrap();
        let dir = StateDirectory::open(temp.path()).unwrap();

        let _a = dir.lock("0_0").unwrap();
        let _b = dir.lock("0_1").unwrap();
        assert_eq!(dir.task_dir("0_1"), temp.path().join("0_1"));
    }
}
