//! Executed blocks and the root state they carry.
use super::{BlockData, BlockHash, EpochNumber, QuorumCert, RoundNumber, VoteInfo};
use crate::{
    serde_util::ord_map_entries,
    shard::{InputRecord, ShardKey},
    unicity::{UnicityCertificate, UnicityTree},
    validator::PublicKey,
};
use im::OrdMap;
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};

/// Latest certified input record of every shard.
/// Persistent maps, so that every block can own a snapshot cheaply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootState {
    /// Certified records.
    #[serde(with = "ord_map_entries")]
    pub records: OrdMap<ShardKey, InputRecord>,
    /// Root round of the block that last certified each shard. Absent for records
    /// certified at genesis.
    #[serde(default, with = "ord_map_entries")]
    pub certified_at: OrdMap<ShardKey, RoundNumber>,
}

impl RootState {
    /// Latest certified record of the shard.
    pub fn get(&self, shard: &ShardKey) -> Option<&InputRecord> {
        self.records.get(shard)
    }

    /// State with the given records replaced.
    pub fn with_changes(&self, changes: impl IntoIterator<Item = (ShardKey, InputRecord)>) -> Self {
        let mut records = self.records.clone();
        for (shard, ir) in changes {
            records.insert(shard, ir);
        }
        Self {
            records,
            certified_at: self.certified_at.clone(),
        }
    }

    /// Root round in which the shard was last certified.
    pub fn certified_at(&self, shard: &ShardKey) -> RoundNumber {
        self.certified_at
            .get(shard)
            .copied()
            .unwrap_or(RoundNumber::GENESIS)
    }

    /// Unicity tree over the records.
    pub fn unicity_tree(&self) -> UnicityTree {
        UnicityTree::new(self.records.iter().map(|(k, ir)| (*k, ir.hash())))
    }
}

/// A block together with the result of executing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedBlock {
    /// The proposed block; `None` for the genesis block.
    pub block: Option<BlockData>,
    /// Root state after the block.
    pub state: RootState,
    /// Unicity tree root hash of `state`.
    pub root_hash: Sha256,
    /// Shards whose record the block changed.
    pub changed: Vec<ShardKey>,
    /// QC certifying this block, once known.
    pub qc: Option<QuorumCert>,
}

impl ExecutedBlock {
    /// Genesis block with the given initial records.
    pub fn genesis(state: RootState) -> Self {
        let mut this = Self {
            root_hash: state.unicity_tree().root_hash(),
            changed: state.records.keys().copied().collect(),
            block: None,
            state,
            qc: None,
        };
        this.qc = Some(QuorumCert::genesis(this.vote_info()));
        this
    }

    /// Executes a block on top of the parent state.
    pub fn new(
        block: BlockData,
        parent_state: &RootState,
        changes: Vec<(ShardKey, InputRecord)>,
    ) -> Self {
        let changed: Vec<_> = changes.iter().map(|(k, _)| *k).collect();
        let mut state = parent_state.with_changes(changes);
        for shard in &changed {
            state.certified_at.insert(*shard, block.round);
        }
        Self {
            root_hash: state.unicity_tree().root_hash(),
            block: Some(block),
            state,
            changed,
            qc: None,
        }
    }

    /// Round of the block.
    pub fn round(&self) -> RoundNumber {
        self.block
            .as_ref()
            .map_or(RoundNumber::GENESIS, |b| b.round)
    }

    /// Round of the parent block; the genesis block is its own parent.
    pub fn parent_round(&self) -> RoundNumber {
        self.block
            .as_ref()
            .map_or(RoundNumber::GENESIS, |b| b.qc.round())
    }

    /// Epoch of the block.
    pub fn epoch(&self) -> EpochNumber {
        self.block.as_ref().map_or(EpochNumber(0), |b| b.epoch)
    }

    /// Timestamp of the block.
    pub fn timestamp(&self) -> u64 {
        self.block.as_ref().map_or(0, |b| b.timestamp)
    }

    /// Author of the block; `None` for genesis.
    pub fn author(&self) -> Option<&PublicKey> {
        self.block.as_ref().map(|b| &b.author)
    }

    /// Hash of the block.
    pub fn hash(&self) -> BlockHash {
        match &self.block {
            Some(b) => b.hash(),
            None => BlockHash(
                Hasher::new("genesis-block")
                    .hash(&self.root_hash)
                    .finish(),
            ),
        }
    }

    /// Vote info for this block.
    pub fn vote_info(&self) -> VoteInfo {
        VoteInfo {
            round: self.round(),
            parent_round: self.parent_round(),
            epoch: self.epoch(),
            timestamp: self.timestamp(),
            block_hash: self.hash(),
            current_root_hash: self.root_hash,
        }
    }
}

/// The latest committed block, with everything needed to serve shards and peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedHead {
    /// The committed block.
    pub block: ExecutedBlock,
    /// QC that committed the block; its seal signs `block.root_hash`.
    /// `None` for genesis.
    pub commit_qc: Option<QuorumCert>,
    /// Latest certificate of every shard.
    #[serde(with = "ord_map_entries")]
    pub certificates: OrdMap<ShardKey, UnicityCertificate>,
}

impl CommittedHead {
    /// Head of a freshly initialized chain.
    pub fn genesis(block: ExecutedBlock) -> Self {
        Self {
            block,
            commit_qc: None,
            certificates: OrdMap::new(),
        }
    }

    /// Round of the committed block.
    pub fn round(&self) -> RoundNumber {
        self.block.round()
    }
}

/// Request for the latest state of a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequest {
    /// Requesting node.
    pub node_id: PublicKey,
}

/// Latest state of a root validator: the committed head and the certified
/// blocks on top of it, in round order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMsg {
    /// Latest committed block.
    pub committed_head: CommittedHead,
    /// Certified uncommitted blocks, ordered by round.
    pub blocks: Vec<ExecutedBlock>,
}
