use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use rootchain_certification::Aggregator;
use rootchain_roles::{
    shard::ShardKey,
    validator::{self, BlockData, ExecutedBlock, Payload, RootMsg},
};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use super::payload;
use crate::{io::ToNetworkMessage, metrics, Config};

/// Everything the leader of a round needs to propose a block.
#[derive(Clone, Debug)]
pub(crate) struct ProposalJustification {
    /// Round to propose in.
    pub(crate) round: validator::RoundNumber,
    /// Highest QC, certifying `parent`.
    pub(crate) high_qc: validator::QuorumCert,
    /// TC of the previous round, if the round was entered by timeout.
    pub(crate) last_tc: Option<validator::TimeoutCert>,
    /// Block to extend.
    pub(crate) parent: ExecutedBlock,
    /// Shards with a change in the uncommitted blocks up to `parent`.
    pub(crate) pipeline: BTreeSet<ShardKey>,
    /// When the replica entered the round.
    pub(crate) round_start: Instant,
}

/// The proposer loop is responsible for proposing new blocks to the network. It watches for new
/// justifications from the replica and if it is the leader for the round, it proposes a new block
/// once the block rate has elapsed since the start of the round.
pub(crate) async fn run_proposer(
    cfg: Arc<Config>,
    aggregator: Arc<Aggregator>,
    network_sender: mpsc::UnboundedSender<ToNetworkMessage>,
    mut justification_watch: watch::Receiver<Option<ProposalJustification>>,
) -> anyhow::Result<()> {
    loop {
        // Wait for a new justification to be available.
        if justification_watch.changed().await.is_err() {
            return Ok(());
        }
        let Some(justification) = justification_watch.borrow_and_update().clone() else {
            continue;
        };

        // If we are not the leader for this round, skip it.
        if cfg.trust_base.leader(justification.round) != cfg.secret_key.public() {
            continue;
        }

        // Give the shards some time to get their requests in.
        tokio::time::sleep_until(justification.round_start + cfg.block_rate).await;
        if justification_watch.has_changed().unwrap_or(true) {
            tracing::debug!(
                "RootBFT proposer - Round {} ended before proposing.",
                justification.round
            );
            continue;
        }

        tracing::trace!(
            "RootBFT proposer - Creating a proposal for round {}.",
            justification.round
        );
        let proposal = create_proposal(&cfg, &aggregator, justification)?;

        // Broadcast our proposal to all replicas (ourselves included).
        tracing::trace!(
            bft_message = format!("{:#?}", proposal),
            "RootBFT proposer - Broadcasting proposal.",
        );
        if network_sender
            .send(ToNetworkMessage::broadcast(RootMsg::Proposal(proposal)))
            .is_err()
        {
            return Ok(());
        }
    }
}

/// Creates a proposal for the given justification. The payload holds the pending
/// decisions that apply on top of the parent and are not already in the pipeline,
/// and a T2 timeout for every other shard that was not certified for too long.
pub(crate) fn create_proposal(
    cfg: &Config,
    aggregator: &Aggregator,
    justification: ProposalJustification,
) -> anyhow::Result<validator::Proposal> {
    let round = justification.round;
    let parent = &justification.parent;
    let mut requests = vec![];
    for change in aggregator.pending() {
        match payload::check_change(
            cfg,
            aggregator,
            parent,
            &justification.pipeline,
            round,
            &change,
        ) {
            Ok(_) => requests.push(change),
            Err(payload::PayloadError::Internal(err)) => return Err(err),
            Err(err) => tracing::debug!("RootBFT proposer - Skipping decision: {err:#}"),
        }
    }

    let included: BTreeSet<ShardKey> = requests.iter().map(|r| r.shard_key()).collect();
    for shard in cfg.orchestration.shards() {
        if included.contains(&shard) || justification.pipeline.contains(&shard) {
            continue;
        }
        match payload::t2_timed_out(cfg, parent, round, &shard) {
            Ok(true) => {
                tracing::debug!("RootBFT proposer - Shard {shard} timed out at round {round}.");
                requests.push(validator::IrChangeRequest::t2_timeout(shard));
            }
            Ok(false) => {}
            Err(payload::PayloadError::Internal(err)) => return Err(err),
            Err(err) => tracing::debug!("RootBFT proposer - Skipping T2 timeout: {err:#}"),
        }
    }
    metrics::METRICS.proposal_payload_size.observe(requests.len());

    let block = BlockData {
        author: cfg.secret_key.public(),
        round: justification.round,
        epoch: cfg.epoch(),
        timestamp: now_millis().max(justification.parent.timestamp()),
        payload: Payload { requests },
        qc: justification.high_qc,
    };
    Ok(validator::Proposal::new(
        &cfg.secret_key,
        block,
        justification.last_tc,
    ))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
