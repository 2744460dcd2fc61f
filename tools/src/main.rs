//! Main binary for the root chain validator. It reads the configuration, opens the database,
//! wires the bft component to a network and runs it. It is the main executable in this workspace.
use anyhow::Context as _;
use clap::Parser;
use rootchain_bft::{create_input_channel, network::LocalNetwork};
use rootchain_tools::ConfigPaths;
use std::{collections::BTreeMap, fs, io::IsTerminal as _, path::PathBuf};
use tokio::sync::mpsc;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};
use vise_exporter::MetricsExporter;

/// Command-line application launching a root validator.
#[derive(Debug, Parser)]
struct Args {
    /// Verify configuration instead of launching a node.
    #[arg(long)]
    verify_config: bool,
    /// Path to a validator key file.
    #[arg(long, default_value = "validator_key")]
    validator_key: PathBuf,
    /// Path to a JSON file with node configuration.
    #[arg(long, default_value = "config.json")]
    config_file: PathBuf,
    /// Path to the RocksDB directory.
    #[arg(long, default_value = "./database")]
    database: PathBuf,
}

impl Args {
    /// Extracts configuration paths from these args.
    fn config_paths(&self) -> ConfigPaths<'_> {
        ConfigPaths {
            app: &self.config_file,
            validator_key: &self.validator_key,
            database: &self.database,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    tracing::trace!(?args, "Starting node");

    if !args.verify_config {
        // Create log file.
        fs::create_dir_all("logs/")?;
        let log_file = fs::File::create("logs/output.log")?;

        // Create the logger for stdout. This will produce human-readable logs for
        // all events of level INFO or higher, unless overridden with RUST_LOG.
        let stdout_log = tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
            .with_file(false)
            .with_line_number(false)
            .with_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            );

        // Create the logger for the log file. This will produce machine-readable logs for
        // all events of level DEBUG or higher.
        let file_log = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(log_file)
            .with_filter(LevelFilter::DEBUG);

        // Create the subscriber. This will combine the two loggers.
        let subscriber = Registry::default().with(stdout_log).with(file_log);

        // Set the subscriber as the global default. This will cause all events in all threads
        // to be logged by the subscriber.
        tracing::subscriber::set_global_default(subscriber)
            .context("set_global_default()")?;

        tracing::info!("Starting node.");
    }

    // Load the config files.
    tracing::debug!("Loading config files.");
    let configs = args.config_paths().load().context("config_paths().load()")?;
    configs.validate().context("configs.validate()")?;

    if args.verify_config {
        tracing::info!("Configuration verified.");
        return Ok(());
    }

    // The transport between root validators lives outside of this binary. A single
    // validator talks only to itself, which an in-process network covers.
    anyhow::ensure!(
        configs.app.validators.len() == 1,
        "{} root validators are configured, but only a single validator can run without an external transport",
        configs.app.validators.len()
    );

    // Initialize the storage.
    tracing::debug!("Initializing storage.");
    let bft_config = configs.make_bft_config().context("make_bft_config()")?;
    let key = bft_config.secret_key.public();

    let (inbound_send, inbound_recv) = create_input_channel();
    let (outbound_send, outbound_recv) = mpsc::unbounded_channel();
    let (network, mut certificates) = LocalNetwork::new(
        bft_config.send_timeout,
        BTreeMap::from([(key, inbound_send)]),
    );

    if let Some(addr) = configs.app.metrics_server_addr {
        tokio::spawn(async move {
            if let Err(err) = MetricsExporter::default().start(addr).await {
                tracing::error!("Metrics exporter stopped: {err:#}");
            }
        });
    }

    tokio::spawn(network.run(key, outbound_recv));
    tokio::spawn(async move {
        while let Some(issued) = certificates.recv().await {
            let uc = &issued.certificate;
            tracing::info!(
                shard = %uc.shard_key(),
                shard_round = uc.input_record.round_number,
                root_round = %uc.seal.root_chain_round,
                "Issued unicity certificate."
            );
        }
    });

    tokio::select! {
        res = bft_config.run(outbound_send, inbound_recv) => res.context("node stopped"),
        res = tokio::signal::ctrl_c() => {
            res.context("ctrl_c()")?;
            tracing::info!("Shutting down.");
            Ok(())
        }
    }
}
