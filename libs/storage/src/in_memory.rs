//! In-memory storage implementation.
use crate::{KeyValueStore, WriteBatch};
use std::{collections::BTreeMap, sync::RwLock};

/// In-memory key-value store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct InMemoryStore(RwLock<BTreeMap<Vec<u8>, Vec<u8>>>);

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.0.read().expect("lock is poisoned").get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let mut map = self.0.write().expect("lock is poisoned");
        for (key, value) in batch.ops {
            match value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn range(&self, from: &[u8], to: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if from >= to {
            return Ok(vec![]);
        }
        let map = self.0.read().expect("lock is poisoned");
        Ok(map
            .range(from.to_vec()..to.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn last_in_range(&self, from: &[u8], to: &[u8]) -> anyhow::Result<Option<(Vec<u8>, Vec<u8>)>> {
        if from >= to {
            return Ok(None);
        }
        let map = self.0.read().expect("lock is poisoned");
        Ok(map
            .range(from.to_vec()..to.to_vec())
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }
}
