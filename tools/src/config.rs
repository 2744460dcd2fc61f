//! Node configuration.
use anyhow::Context as _;
use rootchain_bft as bft;
use rootchain_crypto::{Text, TextFmt as _};
use rootchain_orchestration::{
    Orchestration, OrchestrationError, ShardConfig, DEFAULT_RETENTION,
};
use rootchain_roles::{
    shard::InputRecord,
    validator::{self, ExecutedBlock, LeaderSelectionMode, RootState, WeightedValidator},
};
use rootchain_storage::{BlockStore, RocksDbStore};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Port the nodes listen on by default.
const NODES_PORT: u16 = 3054;

/// Decodes a JSON document, rejecting trailing data.
pub fn decode_json<T: serde::de::DeserializeOwned>(json: &str) -> anyhow::Result<T> {
    let mut d = serde_json::Deserializer::from_str(json);
    let p = T::deserialize(&mut d)?;
    d.end()?;
    Ok(p)
}

/// Encodes a value as pretty-printed JSON.
pub fn encode_json<T: Serialize>(x: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(x)?)
}

fn default_send_timeout_ms() -> u64 {
    1000
}

fn default_sync_retries() -> usize {
    5
}

fn default_sync_backoff_ms() -> u64 {
    1000
}

/// A shard known at genesis: its first configuration and, optionally, its genesis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardGenesis {
    /// Configuration of epoch 0.
    pub config: ShardConfig,
    /// Input record the shard starts from.
    #[serde(default)]
    pub input_record: Option<InputRecord>,
}

/// Node configuration, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Address the transport listens on.
    pub server_addr: SocketAddr,
    /// Address other validators reach this node at.
    pub public_addr: SocketAddr,
    /// Address of the Prometheus metrics endpoint, if any.
    #[serde(default)]
    pub metrics_server_addr: Option<SocketAddr>,

    /// Root validators.
    pub validators: validator::TrustBase,
    /// Round timeout in milliseconds.
    pub round_timeout_ms: u64,
    /// Minimum round duration before the leader proposes, in milliseconds.
    pub block_rate_ms: u64,
    /// Timeout of a single network send, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Number of state sync attempts before the node gives up.
    #[serde(default = "default_sync_retries")]
    pub sync_retries: usize,
    /// Delay before the first state sync retry, in milliseconds.
    #[serde(default = "default_sync_backoff_ms")]
    pub sync_backoff_ms: u64,

    /// Shards certified by the root chain.
    pub shards: Vec<ShardGenesis>,
}

impl AppConfig {
    /// Configuration of a fresh network of `validators_amount` root validators, with
    /// their secret keys.
    pub fn default_for(
        validators_amount: usize,
    ) -> anyhow::Result<(AppConfig, Vec<validator::SecretKey>)> {
        let keys: Vec<_> = (0..validators_amount)
            .map(|_| validator::SecretKey::generate())
            .collect();
        let validators = validator::TrustBase::new(
            keys.iter().map(|k| WeightedValidator {
                key: k.public(),
                weight: 1,
            }),
            LeaderSelectionMode::Weighted,
        )?;
        let addr = SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), NODES_PORT);
        Ok((
            Self {
                server_addr: addr,
                public_addr: addr,
                metrics_server_addr: None,
                validators,
                round_timeout_ms: 2500,
                block_rate_ms: 900,
                send_timeout_ms: default_send_timeout_ms(),
                sync_retries: default_sync_retries(),
                sync_backoff_ms: default_sync_backoff_ms(),
                shards: vec![],
            },
            keys,
        ))
    }

    /// Adds a shard.
    pub fn add_shard(&mut self, shard: ShardGenesis) -> &mut Self {
        self.shards.push(shard);
        self
    }

    /// Sets the metrics endpoint.
    pub fn with_metrics_server_addr(&mut self, metrics_server_addr: SocketAddr) -> &mut Self {
        self.metrics_server_addr = Some(metrics_server_addr);
        self
    }

    /// Genesis block, holding the genesis records of the shards.
    pub fn genesis(&self) -> ExecutedBlock {
        let records = self
            .shards
            .iter()
            .filter_map(|s| Some((s.config.shard_key(), s.input_record.clone()?)));
        ExecutedBlock::genesis(RootState::default().with_changes(records))
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.block_rate_ms < self.round_timeout_ms,
            "block_rate_ms ({}) has to be below round_timeout_ms ({})",
            self.block_rate_ms,
            self.round_timeout_ms
        );
        anyhow::ensure!(self.sync_retries > 0, "sync_retries has to be positive");
        let mut seen = std::collections::BTreeSet::new();
        for (i, s) in self.shards.iter().enumerate() {
            anyhow::ensure!(
                seen.insert(s.config.shard_key()),
                "shards[{i}]: shard {} is configured twice",
                s.config.shard_key()
            );
            anyhow::ensure!(
                s.config.epoch == validator::EpochNumber(0),
                "shards[{i}]: genesis configuration has to be epoch 0"
            );
        }
        Ok(())
    }

    /// Writes the configuration to `config.json` in the given directory.
    pub fn write_to_file(&self, dir: &Path) -> anyhow::Result<()> {
        fs::write(dir.join("config.json"), encode_json(self)?).context("fs::write()")
    }
}

/// This struct holds the file path to each of the config files.
#[derive(Debug)]
pub struct ConfigPaths<'a> {
    /// Path to a JSON file with node configuration.
    pub app: &'a Path,
    /// Path to a validator key file.
    pub validator_key: &'a Path,
    /// Path to the RocksDB directory.
    pub database: &'a Path,
}

/// Everything needed to start a root validator.
#[derive(Debug)]
pub struct Configs {
    /// Node configuration.
    pub app: AppConfig,
    /// The validator's secret key.
    pub validator_key: validator::SecretKey,
    /// RocksDB directory.
    pub database: PathBuf,
}

impl ConfigPaths<'_> {
    /// Loads configs from the file system.
    pub fn load(self) -> anyhow::Result<Configs> {
        Ok(Configs {
            app: (|| {
                let app = fs::read_to_string(self.app).context("failed reading file")?;
                decode_json::<AppConfig>(&app).context("failed decoding JSON")
            })()
            .with_context(|| self.app.display().to_string())?,

            validator_key: (|| {
                let key = fs::read_to_string(self.validator_key).context("failed reading file")?;
                Text::new(key.trim()).decode().context("failed decoding key")
            })()
            .with_context(|| self.validator_key.display().to_string())?,

            database: self.database.into(),
        })
    }
}

impl Configs {
    /// Checks the configuration without touching the database.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.app.validate().context("config")?;
        anyhow::ensure!(
            self.app.validators.contains(&self.validator_key.public()),
            "validator key {} is not among the configured validators",
            self.validator_key.public().encode()
        );
        Ok(())
    }

    /// Opens the databases and builds the configuration of the bft component. Shards
    /// missing from the orchestration store are registered.
    pub fn make_bft_config(&self) -> anyhow::Result<bft::Config> {
        self.validate()?;
        let blocks = RocksDbStore::open(&self.database.join("blocks"))?;
        let shards = RocksDbStore::open(&self.database.join("orchestration"))?;
        let orchestration = Orchestration::new(Arc::new(shards), DEFAULT_RETENTION)
            .context("Orchestration::new()")?;
        for s in &self.app.shards {
            let shard = s.config.shard_key();
            match orchestration.latest(&shard) {
                Ok(_) => tracing::debug!("Shard {shard} is already registered."),
                Err(OrchestrationError::UnknownShard(_)) => orchestration
                    .add_shard_config(s.config.clone())
                    .with_context(|| format!("add_shard_config({shard})"))?,
                Err(err) => return Err(err).context("orchestration.latest()"),
            }
        }
        let app = &self.app;
        Ok(bft::Config {
            secret_key: self.validator_key.clone(),
            trust_base: app.validators.clone(),
            genesis: app.genesis(),
            round_timeout: Duration::from_millis(app.round_timeout_ms),
            block_rate: Duration::from_millis(app.block_rate_ms),
            send_timeout: Duration::from_millis(app.send_timeout_ms),
            sync_retries: app.sync_retries,
            sync_backoff: Duration::from_millis(app.sync_backoff_ms),
            orchestration: Arc::new(orchestration),
            block_store: BlockStore::new(Arc::new(blocks)),
        })
    }
}
