use crate::shard::{PartitionId, ShardId, ShardKey};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Binary Merkle tree over the certified input records of all shards,
/// ordered by (partition, shard). A node with no sibling is promoted unchanged.
#[derive(Clone, Debug)]
pub struct UnicityTree {
    /// `levels[0]` are the leaves, the last level holds the root.
    levels: Vec<Vec<Sha256>>,
    index: BTreeMap<ShardKey, usize>,
}

impl UnicityTree {
    /// Builds the tree from `(shard, input record hash)` pairs.
    pub fn new(records: impl IntoIterator<Item = (ShardKey, Sha256)>) -> Self {
        let sorted: BTreeMap<_, _> = records.into_iter().collect();
        let index = sorted.keys().enumerate().map(|(i, k)| (*k, i)).collect();
        let mut levels = vec![sorted
            .iter()
            .map(|(k, ir_hash)| leaf_hash(k, ir_hash))
            .collect::<Vec<_>>()];
        while levels.last().map_or(0, Vec::len) > 1 {
            let prev = &levels[levels.len() - 1];
            let next = prev
                .chunks(2)
                .map(|pair| match pair {
                    [l, r] => node_hash(l, r),
                    [single] => *single,
                    _ => unreachable!(),
                })
                .collect();
            levels.push(next);
        }
        Self { levels, index }
    }

    /// Root hash of the tree.
    pub fn root_hash(&self) -> Sha256 {
        match self.levels.last().and_then(|l| l.first()) {
            Some(root) => *root,
            None => empty_hash(),
        }
    }

    /// Number of shards in the tree.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Merkle path of the shard, if it is in the tree.
    pub fn certificate(&self, shard: &ShardKey) -> Option<UnicityTreeCertificate> {
        let mut pos = *self.index.get(shard)?;
        let mut path = vec![];
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = pos ^ 1;
            if let Some(hash) = level.get(sibling) {
                path.push(PathItem {
                    sibling: *hash,
                    sibling_is_left: sibling < pos,
                });
            }
            pos /= 2;
        }
        Some(UnicityTreeCertificate {
            partition: shard.partition,
            shard: shard.shard,
            path,
        })
    }
}

/// Merkle path from a shard's leaf to the unicity tree root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicityTreeCertificate {
    /// Partition of the certified shard.
    pub partition: PartitionId,
    /// Certified shard.
    pub shard: ShardId,
    /// Siblings from the leaf level up.
    pub path: Vec<PathItem>,
}

/// One step of a Merkle path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathItem {
    /// Hash of the sibling node.
    pub sibling: Sha256,
    /// Whether the sibling is the left child.
    pub sibling_is_left: bool,
}

impl UnicityTreeCertificate {
    /// Shard the certificate is for.
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::new(self.partition, self.shard)
    }

    /// Root hash implied by the path for the given input record hash.
    pub fn root_hash(&self, ir_hash: &Sha256) -> Sha256 {
        self.path
            .iter()
            .fold(leaf_hash(&self.shard_key(), ir_hash), |acc, item| {
                if item.sibling_is_left {
                    node_hash(&item.sibling, &acc)
                } else {
                    node_hash(&acc, &item.sibling)
                }
            })
    }
}

fn leaf_hash(shard: &ShardKey, ir_hash: &Sha256) -> Sha256 {
    Hasher::new("unicity-tree-leaf")
        .u32(shard.partition.0)
        .u32(shard.shard.0)
        .hash(ir_hash)
        .finish()
}

fn node_hash(left: &Sha256, right: &Sha256) -> Sha256 {
    Hasher::new("unicity-tree-node")
        .hash(left)
        .hash(right)
        .finish()
}

fn empty_hash() -> Sha256 {
    Hasher::new("unicity-tree-empty").finish()
}
