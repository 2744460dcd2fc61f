//! Serde adapters for persistent maps with non-string keys.
use im::OrdMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serializes an `OrdMap` as a sequence of `[key, value]` pairs.
pub(crate) mod ord_map_entries {
    use super::*;

    pub(crate) fn serialize<K, V, S>(map: &OrdMap<K, V>, s: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord + Clone,
        V: Serialize + Clone,
        S: Serializer,
    {
        s.collect_seq(map.iter())
    }

    pub(crate) fn deserialize<'de, K, V, D>(d: D) -> Result<OrdMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord + Clone,
        V: Deserialize<'de> + Clone,
        D: Deserializer<'de>,
    {
        let entries: Vec<(K, V)> = Vec::deserialize(d)?;
        Ok(entries.into_iter().collect())
    }
}
