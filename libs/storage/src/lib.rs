//! Persistent storage of the root chain. The crate exposes an ordered key-value store
//! capability, backed either by RocksDB or by memory, and the typed stores built on it.
//! Nothing else in the workspace depends on the storage engine.

mod block_store;
mod in_memory;
mod kv;
mod rocksdb;
#[cfg(test)]
mod tests;

pub use crate::{
    block_store::{BlockStore, SafetyData},
    in_memory::InMemoryStore,
    kv::{KeyValueStore, WriteBatch},
    rocksdb::RocksDbStore,
};
