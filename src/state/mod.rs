pub mod shard_status;

pub use shard_status::{CycleOutcome, ShardStatus, ShardStatusStore};
