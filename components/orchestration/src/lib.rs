//! Orchestration store: the epoch-indexed directory of shard configurations.
//!
//! Every shard has a chain of configurations, one per epoch. A configuration is
//! immutable once published and takes effect at its activation round (a shard round).
//! Records are persisted in an ordered key-value store under
//! `partition ‖ shard ‖ epoch` (big endian); the most recent epochs of every shard are
//! cached in memory. Reads run concurrently, writes are serialized.

use anyhow::Context as _;
use rootchain_roles::{
    shard::{PartitionId, PartitionTypeId, ShardId, ShardKey},
    validator::{EpochNumber, TrustBase},
};
use rootchain_storage::{KeyValueStore, WriteBatch};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};


/// Number of most recent epochs per shard kept in memory by default.
pub const DEFAULT_RETENTION: usize = 5;

/// Configuration of a shard for one epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Type of the partition.
    pub partition_type: PartitionTypeId,
    /// Partition of the shard.
    pub partition: PartitionId,
    /// The shard.
    pub shard: ShardId,
    /// Epoch of the configuration.
    pub epoch: EpochNumber,
    /// First shard round in which the configuration is active.
    pub activation_round: u64,
    /// Validators of the shard and their stakes.
    pub trust_base: TrustBase,
    /// Time without certification after which the root chain considers the shard stalled.
    pub t2_timeout_ms: u64,
}

impl ShardConfig {
    /// Shard the configuration is for.
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::new(self.partition, self.shard)
    }

    /// T2 timeout of the shard.
    pub fn t2_timeout(&self) -> Duration {
        Duration::from_millis(self.t2_timeout_ms)
    }
}

/// Error returned by orchestration lookups and updates.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// The shard has no configuration.
    #[error("unknown shard {0}")]
    UnknownShard(ShardKey),
    /// The shard has no configuration for the epoch.
    #[error("shard {shard} has no epoch {epoch}")]
    UnknownEpoch {
        /// The shard.
        shard: ShardKey,
        /// Requested epoch.
        epoch: EpochNumber,
    },
    /// No epoch of the shard is active in the round.
    #[error("shard {shard} has no active epoch in round {round}")]
    NotActive {
        /// The shard.
        shard: ShardKey,
        /// Requested shard round.
        round: u64,
    },
    /// Rejected update.
    #[error("invalid shard configuration: {0}")]
    InvalidConfig(String),
    /// Storage failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

type Epochs = BTreeMap<EpochNumber, Arc<ShardConfig>>;

/// Epoch-indexed directory of shard configurations.
pub struct Orchestration {
    db: Arc<dyn KeyValueStore>,
    retention: usize,
    /// Most recent `retention` epochs of every shard.
    cache: RwLock<BTreeMap<ShardKey, Epochs>>,
    /// Serializes writers.
    writer: Mutex<()>,
}

impl fmt::Debug for Orchestration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Orchestration")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

fn shard_prefix(shard: &ShardKey) -> [u8; 8] {
    let mut prefix = [0u8; 8];
    prefix[..4].copy_from_slice(&shard.partition.0.to_be_bytes());
    prefix[4..].copy_from_slice(&shard.shard.0.to_be_bytes());
    prefix
}

fn encode_key(shard: &ShardKey, epoch: EpochNumber) -> Vec<u8> {
    let mut key = shard_prefix(shard).to_vec();
    key.extend_from_slice(&epoch.0.to_be_bytes());
    key
}

/// Key range covering all epochs of the shard.
fn shard_range(shard: &ShardKey) -> (Vec<u8>, Vec<u8>) {
    let prefix = u64::from_be_bytes(shard_prefix(shard));
    let end = match prefix.checked_add(1) {
        Some(next) => {
            let mut end = next.to_be_bytes().to_vec();
            end.extend_from_slice(&[0; 8]);
            end
        }
        // Longer than any key.
        None => vec![0xff; 17],
    };
    (encode_key(shard, EpochNumber(0)), end)
}

fn decode(raw: &[u8]) -> anyhow::Result<Arc<ShardConfig>> {
    serde_json::from_slice(raw)
        .map(Arc::new)
        .context("failed decoding shard config")
}

impl Orchestration {
    /// Opens the orchestration over `db`, loading the recent epochs of every shard.
    pub fn new(db: Arc<dyn KeyValueStore>, retention: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(retention > 0, "retention has to be positive");
        let mut cache: BTreeMap<ShardKey, Epochs> = BTreeMap::new();
        for (_, raw) in db.range(&[], &[0xff; 17])? {
            let cfg = decode(&raw)?;
            let epochs = cache.entry(cfg.shard_key()).or_default();
            epochs.insert(cfg.epoch, cfg);
            trim(epochs, retention);
        }
        tracing::debug!("Loaded orchestration with {} shards", cache.len());
        Ok(Self {
            db,
            retention,
            cache: RwLock::new(cache),
            writer: Mutex::new(()),
        })
    }

    /// Shards with at least one configuration.
    pub fn shards(&self) -> Vec<ShardKey> {
        self.cache
            .read()
            .expect("lock is poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Latest configuration of the shard.
    pub fn latest(&self, shard: &ShardKey) -> Result<Arc<ShardConfig>, OrchestrationError> {
        self.cache
            .read()
            .expect("lock is poisoned")
            .get(shard)
            .and_then(|epochs| epochs.values().next_back().cloned())
            .ok_or(OrchestrationError::UnknownShard(*shard))
    }

    /// Configuration of the shard in the given epoch.
    pub fn shard_config(
        &self,
        shard: &ShardKey,
        epoch: EpochNumber,
    ) -> Result<Arc<ShardConfig>, OrchestrationError> {
        if let Some(cfg) = self
            .cache
            .read()
            .expect("lock is poisoned")
            .get(shard)
            .and_then(|epochs| epochs.get(&epoch))
        {
            return Ok(cfg.clone());
        }
        match self.db.get(&encode_key(shard, epoch))? {
            Some(raw) => Ok(decode(&raw)?),
            None => Err(OrchestrationError::UnknownEpoch {
                shard: *shard,
                epoch,
            }),
        }
    }

    /// Configuration of the shard active in the given shard round: the latest epoch
    /// whose activation round is not after `round`.
    pub fn shard_config_for_round(
        &self,
        shard: &ShardKey,
        round: u64,
    ) -> Result<Arc<ShardConfig>, OrchestrationError> {
        {
            let cache = self.cache.read().expect("lock is poisoned");
            let epochs = cache
                .get(shard)
                .ok_or(OrchestrationError::UnknownShard(*shard))?;
            if let Some(cfg) = epochs.values().rev().find(|c| c.activation_round <= round) {
                return Ok(cfg.clone());
            }
            // The cache holds the most recent epochs, so a miss means that either the
            // round precedes the shard altogether or the epoch was evicted.
            let oldest_cached = epochs.keys().next().copied().unwrap_or_default();
            if oldest_cached == EpochNumber(0) {
                return Err(OrchestrationError::NotActive {
                    shard: *shard,
                    round,
                });
            }
        }
        let (from, to) = shard_range(shard);
        for (_, raw) in self.db.range(&from, &to)?.into_iter().rev() {
            let cfg = decode(&raw)?;
            if cfg.activation_round <= round {
                return Ok(cfg);
            }
        }
        Err(OrchestrationError::NotActive {
            shard: *shard,
            round,
        })
    }

    /// All configurations of the shard, in epoch order, read from the durable store.
    pub fn history(&self, shard: &ShardKey) -> Result<Vec<Arc<ShardConfig>>, OrchestrationError> {
        let (from, to) = shard_range(shard);
        Ok(self
            .db
            .range(&from, &to)?
            .iter()
            .map(|(_, raw)| decode(raw))
            .collect::<anyhow::Result<_>>()?)
    }

    /// Publishes a new epoch of a shard. The first configuration of a shard must be
    /// epoch 0; every next one must increment the epoch and activate strictly later.
    pub fn add_shard_config(&self, cfg: ShardConfig) -> Result<(), OrchestrationError> {
        let _writer = self.writer.lock().expect("lock is poisoned");
        let shard = cfg.shard_key();
        let (from, to) = shard_range(&shard);
        match self.db.last_in_range(&from, &to)? {
            None => {
                if cfg.epoch != EpochNumber(0) {
                    return Err(OrchestrationError::InvalidConfig(format!(
                        "first epoch of shard {shard} has to be 0, got {}",
                        cfg.epoch
                    )));
                }
            }
            Some((_, raw)) => {
                let last = decode(&raw)?;
                if cfg.epoch != last.epoch.next() {
                    return Err(OrchestrationError::InvalidConfig(format!(
                        "expected epoch {} for shard {shard}, got {}",
                        last.epoch.next(),
                        cfg.epoch
                    )));
                }
                if cfg.activation_round <= last.activation_round {
                    return Err(OrchestrationError::InvalidConfig(format!(
                        "activation round {} is not after {}",
                        cfg.activation_round, last.activation_round
                    )));
                }
                if cfg.partition_type != last.partition_type {
                    return Err(OrchestrationError::InvalidConfig(
                        "partition type cannot change".to_owned(),
                    ));
                }
            }
        }
        let raw = serde_json::to_vec(&cfg).context("failed encoding shard config")?;
        let mut batch = WriteBatch::new();
        batch.put(encode_key(&shard, cfg.epoch), raw);
        self.db.write(batch)?;
        tracing::info!(
            "Orchestration - shard {shard} epoch {} activates at round {}",
            cfg.epoch,
            cfg.activation_round
        );
        let mut cache = self.cache.write().expect("lock is poisoned");
        let epochs = cache.entry(shard).or_default();
        epochs.insert(cfg.epoch, Arc::new(cfg));
        trim(epochs, self.retention);
        Ok(())
    }
}

/// Drops the oldest epochs beyond the retention window.
fn trim(epochs: &mut Epochs, retention: usize) {
    while epochs.len() > retention {
        epochs.pop_first();
    }
}
