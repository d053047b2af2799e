//! Domain types for standby replication
//!
//! Task identity, change-log partitions and records, and the offset maps
//! that tie replay progress to checkpoints and ceilings.

mod id;
mod offsets;
mod partition;
mod record;

pub use id::TaskId;
pub use offsets::{CommittedOffsets, OffsetLimit, OffsetMap, UNBOUNDED, UNCOMMITTED};
pub use partition::PartitionKey;
pub use record::{ChangelogRecord, StateWrite};
