//! Shard role: partitions, shards and the records they submit to the root chain.

mod messages;
pub mod testonly;

pub use messages::*;
