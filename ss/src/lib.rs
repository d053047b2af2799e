//! StateStore - local key-value state for stream tasks
//!
//! Provides the storage surface a task applies its change-log records to,
//! plus exclusive ownership of the on-disk directory that holds it.
//!
//! # Architecture
//!
//! ```text
//! {state_dir}/
//! └── {task_id}/
//!     ├── .lock                     # held exclusively while a task is live
//!     ├── .checkpoint               # written by the owning task
//!     └── {source}-{partition}.sqlite3
//! ```
//!
//! # Example
//!
//! ```ignore
//! use statestore::{SqliteStore, StateDirectory, StateStore};
//!
//! let dir = StateDirectory::open("/var/lib/standby")?;
//! let lock = dir.lock("0_1")?;
//! let mut store = SqliteStore::open(lock.dir().join("orders-0.sqlite3"))?;
//! store.put(b"k", b"v")?;
//! store.flush()?;
//! ```

mod directory;
mod error;
mod memory;
mod sqlite;
mod store;

pub use directory::{DirectoryLock, LOCK_FILE_NAME, StateDirectory};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::StateStore;
