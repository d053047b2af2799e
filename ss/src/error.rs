//! Errors from state stores and state directories

use std::path::PathBuf;

use thiserror::Error;

/// Errors from store and directory operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State directory {} is locked by another owner", path.display())]
    Locked { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store {name} is closed")]
    Closed { name: String },

    #[error("Store {name} rejected the operation: {reason}")]
    Rejected { name: String, reason: String },

    #[error("Store {name} lock poisoned")]
    Poisoned { name: String },
}
