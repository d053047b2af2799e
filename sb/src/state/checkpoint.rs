//! Checkpoint file
//!
//! One `.checkpoint` per task directory holding the offset map at the last
//! commit. Writes go to a temp file in the same directory, are fsynced, then
//! renamed over the previous checkpoint, so an interrupted write leaves the
//! previous checkpoint intact. Leftover temp files are only removed by
//! `sweep_temp_files`, which callers run while holding the task directory lock.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{OffsetMap, PartitionKey};

/// Name of the checkpoint file inside a task directory
pub const CHECKPOINT_FILE_NAME: &str = ".checkpoint";

const CHECKPOINT_VERSION: u32 = 0;
const TEMP_PREFIX: &str = ".checkpoint.";
const TEMP_SUFFIX: &str = ".tmp";

/// Errors reading or writing a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed checkpoint: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unsupported checkpoint version {version} in {}", path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("Failed to replace checkpoint: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointContent {
    version: u32,
    written_at: DateTime<Utc>,
    offsets: Vec<CheckpointEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEntry {
    source: String,
    partition: u32,
    offset: i64,
}

/// The checkpoint file of one task directory
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    dir: PathBuf,
    path: PathBuf,
}

impl CheckpointFile {
    /// Checkpoint file inside `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(CHECKPOINT_FILE_NAME);
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the checkpoint; `None` when no checkpoint was ever written
    ///
    /// Read-only: safe without the directory lock.
    pub fn read(&self) -> Result<Option<OffsetMap>, CheckpointError> {
        debug!(path = %self.path.display(), "CheckpointFile::read: called");
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "CheckpointFile::read: no checkpoint");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let header: VersionHeader = serde_json::from_str(&content)?;
        if header.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path: self.path.clone(),
                version: header.version,
            });
        }

        let parsed: CheckpointContent = serde_json::from_str(&content)?;
        let offsets: OffsetMap = parsed
            .offsets
            .into_iter()
            .map(|e| (PartitionKey::new(e.source, e.partition), e.offset))
            .collect();
        debug!(count = offsets.len(), written_at = %parsed.written_at, "CheckpointFile::read: loaded");
        Ok(Some(offsets))
    }

    /// Atomically replace the checkpoint with `offsets`
    pub fn write(&self, offsets: &OffsetMap) -> Result<(), CheckpointError> {
        debug!(path = %self.path.display(), count = offsets.len(), "CheckpointFile::write: called");
        let content = CheckpointContent {
            version: CHECKPOINT_VERSION,
            written_at: Utc::now(),
            offsets: offsets
                .iter()
                .map(|(p, o)| CheckpointEntry {
                    source: p.source.clone(),
                    partition: p.partition,
                    offset: *o,
                })
                .collect(),
        };

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)?;
        serde_json::to_writer_pretty(temp.as_file_mut(), &content)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)?;
        sync_dir(&self.dir)?;

        info!(path = %self.path.display(), count = offsets.len(), "Wrote checkpoint");
        Ok(())
    }

    /// Remove temp files left by writes that never reached the rename
    ///
    /// Only call with the task directory lock held; otherwise this can delete
    /// the temp file of a writer that is still running.
    pub fn sweep_temp_files(&self) {
        debug!(dir = %self.dir.display(), "CheckpointFile::sweep_temp_files: called");
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
                warn!(file = %name, "Removing stale checkpoint temp file");
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(file = %name, error = %e, "Failed to remove stale checkpoint temp file");
                }
            }
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
