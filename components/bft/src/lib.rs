//! This crate contains the root chain consensus component, which is responsible for agreeing on the
//! root state and certifying shard input records. It runs RootBFT, a chained BFT protocol with a
//! 2-chain commit rule, next to the certification aggregator that turns shard requests into IR
//! change decisions.

pub use config::Config;
pub use io::{
    create_input_channel, deliver, FromNetworkMessage, InboundMsg, OutboundMsg, Target,
    ToNetworkMessage, INBOUND_CAPACITY,
};
use rootchain_certification::Aggregator;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

mod config;
mod io;
mod metrics;
pub mod network;
/// This module contains the implementation of the RootBFT algorithm.
mod root_bft;
#[cfg(test)]
mod testonly;
#[cfg(test)]
mod tests;

impl Config {
    /// Starts the bft component. It will start running, processing incoming messages and
    /// sending output messages. Returns when the inbound channel is closed, or with the
    /// first internal error of the replica or the proposer.
    pub async fn run(
        self,
        outbound_channel: mpsc::UnboundedSender<ToNetworkMessage>,
        inbound_channel: mpsc::Receiver<FromNetworkMessage>,
    ) -> anyhow::Result<()> {
        self.validate()?;
        let cfg = Arc::new(self);
        // The replica resets the aggregator to the recovered committed state.
        let aggregator = Arc::new(Aggregator::new(
            cfg.orchestration.clone(),
            &cfg.genesis.state,
        ));

        let (proposer_sender, proposer_receiver) = watch::channel(None);
        let replica = root_bft::StateMachine::start(
            cfg.clone(),
            aggregator.clone(),
            outbound_channel.clone(),
            inbound_channel,
            proposer_sender,
        )?;

        tracing::info!("Starting RootBFT replica and proposer.");
        let res = tokio::select! {
            res = replica.run() => res,
            res = root_bft::proposer::run_proposer(
                cfg.clone(),
                aggregator,
                outbound_channel,
                proposer_receiver,
            ) => res,
        };
        match &res {
            Ok(()) => tracing::info!("RootBFT stopped."),
            Err(err) => tracing::error!("RootBFT stopped with an error: {err:#}"),
        }
        res
    }
}
