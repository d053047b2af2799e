//! Task-local state: stores, offsets and checkpoints

mod checkpoint;
mod manager;
mod provider;

pub use checkpoint::{CHECKPOINT_FILE_NAME, CheckpointError, CheckpointFile};
pub use manager::StateManager;
pub use provider::{MemoryProvider, SqliteProvider, StoreProvider};
