//! Durable store of the root chain: the committed head, certified blocks and the
//! replica safety data.
use crate::{KeyValueStore, WriteBatch};
use anyhow::Context as _;
use rootchain_roles::validator::{CommittedHead, ExecutedBlock, RoundNumber};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Enum used to represent a key in the database. It also acts as a separator between different stores.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DatabaseKey {
    /// CommittedHead -> CommittedHead
    CommittedHead,
    /// SafetyData -> SafetyData
    SafetyData,
    /// Block(RoundNumber) -> ExecutedBlock
    Block(RoundNumber),
}

impl DatabaseKey {
    const BLOCK_PREFIX: u8 = 0x10;

    /// Encodes this key for usage as a database key.
    fn encode_key(&self) -> Vec<u8> {
        match self {
            Self::CommittedHead => vec![0x01],
            Self::SafetyData => vec![0x02],
            // Big endian, so that keys are ordered by round.
            Self::Block(round) => {
                let mut key = vec![Self::BLOCK_PREFIX];
                key.extend_from_slice(&round.0.to_be_bytes());
                key
            }
        }
    }

    /// Key range of blocks with rounds in `[from, ..)`.
    fn blocks_from(from: RoundNumber) -> (Vec<u8>, Vec<u8>) {
        (
            Self::Block(from).encode_key(),
            vec![Self::BLOCK_PREFIX + 1],
        )
    }
}

/// Votes and timeouts that the replica has signed. Persisted before anything signed
/// leaves the node, so that a restarted replica never signs twice for a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyData {
    /// Highest round the replica voted or timed out in.
    pub highest_voted_round: RoundNumber,
    /// Highest round of a QC the replica has seen.
    pub highest_qc_round: RoundNumber,
}

/// Typed access to the blocks of the root chain.
#[derive(Clone)]
pub struct BlockStore {
    db: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("BlockStore")
    }
}

impl BlockStore {
    /// Wraps a key-value store.
    pub fn new(db: Arc<dyn KeyValueStore>) -> Self {
        Self { db }
    }

    /// Initializes an empty store with the genesis block. If the store is already
    /// initialized, checks that it was initialized with the same genesis.
    pub fn init(&self, genesis: &ExecutedBlock) -> anyhow::Result<()> {
        if self.committed_head()?.is_some() {
            let stored = self
                .load_block(RoundNumber::GENESIS)?
                .context("genesis block missing from an initialized store")?;
            anyhow::ensure!(
                stored.hash() == genesis.hash(),
                "Mismatch between stored and expected genesis block"
            );
            return Ok(());
        }
        tracing::debug!("Initializing block store with genesis {:?}", genesis.hash());
        let mut batch = WriteBatch::new();
        put(
            &mut batch,
            &DatabaseKey::CommittedHead,
            &CommittedHead::genesis(genesis.clone()),
        )?;
        put(&mut batch, &DatabaseKey::Block(RoundNumber::GENESIS), genesis)?;
        self.db.write(batch)
    }

    /// Latest committed block.
    pub fn committed_head(&self) -> anyhow::Result<Option<CommittedHead>> {
        self.get(&DatabaseKey::CommittedHead)
            .context("committed head")
    }

    /// Block of the given round, committed or certified.
    pub fn load_block(&self, round: RoundNumber) -> anyhow::Result<Option<ExecutedBlock>> {
        self.get(&DatabaseKey::Block(round))
            .with_context(|| format!("block {round}"))
    }

    /// Blocks with round at least `from`, in round order.
    pub fn blocks_from(&self, from: RoundNumber) -> anyhow::Result<Vec<ExecutedBlock>> {
        let (start, end) = DatabaseKey::blocks_from(from);
        self.db
            .range(&start, &end)?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).context("failed decoding block"))
            .collect()
    }

    /// Persists a certified block.
    pub fn store_block(&self, block: &ExecutedBlock) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        put(&mut batch, &DatabaseKey::Block(block.round()), block)?;
        self.db.write(batch)
    }

    /// Atomically persists a new committed head and removes the blocks that
    /// are no longer reachable from it.
    pub fn commit(&self, head: &CommittedHead, pruned: &[RoundNumber]) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        put(&mut batch, &DatabaseKey::Block(head.round()), &head.block)?;
        put(&mut batch, &DatabaseKey::CommittedHead, head)?;
        for round in pruned {
            batch.delete(DatabaseKey::Block(*round).encode_key());
        }
        self.db.write(batch)
    }

    /// Atomically replaces the head and all blocks above it, after state sync.
    pub fn reset(&self, head: &CommittedHead, blocks: &[ExecutedBlock]) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        let (start, end) = DatabaseKey::blocks_from(head.round().next());
        for (key, _) in self.db.range(&start, &end)? {
            batch.delete(key);
        }
        put(&mut batch, &DatabaseKey::Block(head.round()), &head.block)?;
        put(&mut batch, &DatabaseKey::CommittedHead, head)?;
        for b in blocks {
            put(&mut batch, &DatabaseKey::Block(b.round()), b)?;
        }
        self.db.write(batch)
    }

    /// Safety data; default if none was stored yet.
    pub fn safety_data(&self) -> anyhow::Result<SafetyData> {
        Ok(self
            .get(&DatabaseKey::SafetyData)
            .context("safety data")?
            .unwrap_or_default())
    }

    /// Persists the safety data.
    pub fn set_safety_data(&self, data: &SafetyData) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        put(&mut batch, &DatabaseKey::SafetyData, data)?;
        self.db.write(batch)
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, key: &DatabaseKey) -> anyhow::Result<Option<T>> {
        let Some(raw) = self.db.get(&key.encode_key())? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed decoding {key:?}"))
            .map(Some)
    }
}

fn put<T: Serialize>(batch: &mut WriteBatch, key: &DatabaseKey, value: &T) -> anyhow::Result<()> {
    let raw = serde_json::to_vec(value).with_context(|| format!("failed encoding {key:?}"))?;
    batch.put(key.encode_key(), raw);
    Ok(())
}
