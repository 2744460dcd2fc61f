//! Types shared by the root chain components.
//!
//! - `shard`: identifiers of partitions and shards, the input records they submit and the
//!   certification requests their validators sign.
//! - `validator`: root validator keys, the weighted trust base, and the messages of the
//!   root consensus protocol.
//! - `unicity`: the unicity tree, seal and certificate returned to the shards.

pub mod shard;
pub mod unicity;
pub mod validator;

mod serde_util;
