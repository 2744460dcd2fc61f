//! The inner data of the consensus state machine. This is shared between the different roles.
use rootchain_orchestration::Orchestration;
use rootchain_roles::validator;
use rootchain_storage::BlockStore;
use std::{sync::Arc, time::Duration};

/// Configuration of the bft component.
#[derive(Debug)]
pub struct Config {
    /// The validator's secret key.
    pub secret_key: validator::SecretKey,
    /// Root validators.
    pub trust_base: validator::TrustBase,
    /// Genesis block. The block store is initialized with it on first start.
    pub genesis: validator::ExecutedBlock,
    /// The duration of the round timeout.
    pub round_timeout: Duration,
    /// Minimum duration of a round before its leader proposes, so that shards
    /// have time to get their requests certified.
    pub block_rate: Duration,
    /// Timeout of a single network send. Applied by the transport.
    pub send_timeout: Duration,
    /// Number of state sync attempts before giving up.
    pub sync_retries: usize,
    /// Delay before the first state sync retry; doubles with every attempt.
    pub sync_backoff: Duration,
    /// Shard configurations.
    pub orchestration: Arc<Orchestration>,
    /// Durable block store.
    pub block_store: BlockStore,
}

impl Config {
    /// Epoch of the root validator set.
    pub fn epoch(&self) -> validator::EpochNumber {
        self.genesis.epoch()
    }

    /// Number of root rounds after which a shard with the given T2 timeout, which was
    /// not certified in the meantime, gets its last record certified again.
    pub fn t2_rounds(&self, t2_timeout: Duration) -> u64 {
        (t2_timeout.as_millis() / self.block_rate.as_millis().max(1)) as u64 + 1
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.trust_base.contains(&self.secret_key.public()),
            "validator key {} is not in the root trust base",
            self.secret_key.public()
        );
        anyhow::ensure!(
            self.genesis.block.is_none() && self.genesis.qc.is_some(),
            "genesis has to be an unproposed block with a genesis QC"
        );
        anyhow::ensure!(
            self.block_rate < self.round_timeout,
            "block rate ({:?}) has to be below the round timeout ({:?})",
            self.block_rate,
            self.round_timeout
        );
        anyhow::ensure!(self.sync_retries > 0, "sync_retries has to be positive");
        Ok(())
    }
}
