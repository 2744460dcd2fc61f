//! Unicity certificates: the proof, returned to a shard, that its input record was
//! certified by the root chain.
//!
//! A certificate consists of the input record, a Merkle path binding the record into
//! the unicity tree root hash, and a seal signed by a quorum of root validators over
//! that root hash.

mod certificate;
mod seal;
mod tree;

pub use certificate::*;
pub use seal::*;
pub use tree::*;
