//! The RootBFT module contains the implementation of the root chain consensus protocol.
//! It is a chained BFT protocol with a 2-chain commit rule: every round the leader
//! proposes a block on top of the highest certified block, validators vote for it, and
//! a block is committed once a QC certifies its child, which is consecutive to it, and
//! that child is itself referenced by a further QC. Commits seal the unicity tree of the
//! committed block and issue unicity certificates to the shards.

use std::{fmt, sync::Arc};

use rootchain_certification::Aggregator;
use rootchain_roles::validator::{self, RootMsg};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use crate::{
    io::{FromNetworkMessage, InboundMsg, ToNetworkMessage},
    metrics, Config,
};

mod block_tree;
mod certification;
mod pacemaker;
mod payload;
mod proposal;
/// The proposer module contains the logic for the proposer role in RootBFT.
pub(crate) mod proposer;
mod safety;
mod state_sync;
#[cfg(test)]
pub(crate) mod testonly;
#[cfg(test)]
mod tests;
mod timeout;
mod vote;
mod vote_register;

use block_tree::{BlockTree, BlockTreeError, Commit};
use pacemaker::Pacemaker;
pub(crate) use proposer::ProposalJustification;
use safety::SafetyModule;
use state_sync::StateSync;
use vote_register::VoteRegister;

/// Errors of the message handlers, classified for logging.
pub(crate) trait HandlerError: fmt::Display {
    /// Whether the message is merely outdated.
    fn is_old(&self) -> bool;
    /// Extracts the internal error, which is fatal.
    fn into_internal(self) -> Result<anyhow::Error, Self>
    where
        Self: Sized;
}

/// Logs a handler error at a level matching its kind. Internal errors are returned.
fn log_result<E: HandlerError>(name: &str, res: Result<(), E>) -> anyhow::Result<Result<(), ()>> {
    let Err(err) = res else {
        return Ok(Ok(()));
    };
    if err.is_old() {
        tracing::debug!("RootBFT replica - {name}: {err:#}");
        return Ok(Err(()));
    }
    match err.into_internal() {
        Ok(err) => {
            tracing::error!("RootBFT replica - {name}: internal error: {err:#}");
            Err(err)
        }
        Err(err) => {
            tracing::warn!("RootBFT replica - {name}: {err:#}");
            Ok(Err(()))
        }
    }
}

/// The StateMachine struct contains the state of the replica and implements all the
/// logic of RootBFT.
#[derive(Debug)]
pub(crate) struct StateMachine {
    /// Consensus configuration.
    pub(crate) config: Arc<Config>,
    /// Channel through which replica sends network messages.
    pub(super) outbound_channel: mpsc::UnboundedSender<ToNetworkMessage>,
    /// Channel through which replica receives network requests.
    pub(crate) inbound_channel: mpsc::Receiver<FromNetworkMessage>,
    /// The sender part of the proposer watch channel. This is used to notify the proposer loop
    /// and send the needed justification.
    pub(crate) proposer_sender: watch::Sender<Option<ProposalJustification>>,

    /// Certification aggregator, shared with the proposer.
    pub(crate) aggregator: Arc<Aggregator>,
    pub(crate) pacemaker: Pacemaker,
    pub(crate) safety: SafetyModule,
    pub(crate) block_tree: BlockTree,
    pub(crate) votes: VoteRegister,
    pub(crate) sync: StateSync,
}

impl StateMachine {
    /// Creates a new [`StateMachine`] instance, recovering the committed head, the
    /// certified blocks and the safety data from the block store. Failing to do so is
    /// fatal: the replica must not vote on a state it cannot reconstruct.
    pub(crate) fn start(
        config: Arc<Config>,
        aggregator: Arc<Aggregator>,
        outbound_channel: mpsc::UnboundedSender<ToNetworkMessage>,
        inbound_channel: mpsc::Receiver<FromNetworkMessage>,
        proposer_sender: watch::Sender<Option<ProposalJustification>>,
    ) -> anyhow::Result<Self> {
        let block_tree = BlockTree::load(config.block_store.clone(), &config.genesis)?;
        let safety = SafetyModule::new(config.secret_key.clone(), config.block_store.clone())?;
        aggregator.reset(&block_tree.committed().block.state);
        metrics::METRICS
            .committed_round
            .set(block_tree.committed().round().0);

        Ok(Self {
            pacemaker: Pacemaker::new(block_tree.high_qc().round().next(), config.round_timeout),
            config,
            outbound_channel,
            inbound_channel,
            proposer_sender,
            aggregator,
            safety,
            block_tree,
            votes: VoteRegister::default(),
            sync: StateSync::default(),
        })
    }

    /// Runs a loop to process incoming messages and timer events. This is the main
    /// entry point for the state machine. Returns when the inbound channel is closed,
    /// or with an error when processing hit an internal error.
    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(
            "Starting RootBFT replica at round {}.",
            self.pacemaker.round()
        );
        self.start_new_round();

        loop {
            let sync_deadline = self.sync.deadline();
            tokio::select! {
                req = self.inbound_channel.recv() => {
                    let Some(req) = req else {
                        tracing::info!("RootBFT replica - Inbound channel closed, stopping.");
                        return Ok(());
                    };
                    self.process_message(req)?;
                }
                () = tokio::time::sleep_until(self.pacemaker.deadline()) => {
                    self.on_round_timeout()?;
                }
                () = sleep_until(sync_deadline) => {
                    self.on_sync_retry()?;
                }
            }
        }
    }

    /// Dispatches a single message to its handler.
    pub(crate) fn process_message(&mut self, req: FromNetworkMessage) -> anyhow::Result<()> {
        let now = Instant::now();
        let label = match req.msg {
            InboundMsg::Proposal(msg) => {
                let res = log_result("on_proposal()", self.on_proposal(msg))?;
                metrics::RootMsgLabel::Proposal.with_result(&res)
            }
            InboundMsg::Vote(msg) => {
                let res = log_result("on_vote()", self.on_vote(msg))?;
                metrics::RootMsgLabel::Vote.with_result(&res)
            }
            InboundMsg::Timeout(msg) => {
                let res = log_result("on_timeout()", self.on_timeout(msg))?;
                metrics::RootMsgLabel::Timeout.with_result(&res)
            }
            InboundMsg::StateRequest(msg) => {
                let res = log_result("on_state_request()", self.on_state_request(msg))?;
                metrics::RootMsgLabel::StateRequest.with_result(&res)
            }
            InboundMsg::StateResponse(msg) => {
                let res =
                    log_result("on_state_response()", self.on_state_response(req.peer, *msg))?;
                metrics::RootMsgLabel::StateResponse.with_result(&res)
            }
            InboundMsg::IrChangeRequest(msg) => {
                let res = log_result("on_ir_change_request()", self.on_ir_change_request(msg))?;
                metrics::RootMsgLabel::IrChangeRequest.with_result(&res)
            }
            InboundMsg::CertificationRequest(msg) => {
                let res = log_result(
                    "on_certification_request()",
                    self.on_certification_request(msg),
                )?;
                metrics::RootMsgLabel::CertificationRequest.with_result(&res)
            }
        };
        metrics::METRICS.message_processing_latency[&label].observe(now.elapsed());
        Ok(())
    }

    /// Sends a message to the network. A closed channel means the node is shutting down.
    pub(crate) fn send(&self, msg: ToNetworkMessage) {
        if self.outbound_channel.send(msg).is_err() {
            tracing::debug!("RootBFT replica - Outbound channel closed, dropping message.");
        }
    }

    /// Broadcasts a message to all root validators, ourselves included.
    pub(crate) fn broadcast(&self, msg: RootMsg) {
        tracing::trace!(
            bft_message = format!("{:#?}", msg),
            "RootBFT replica - Broadcasting {}.",
            msg.label()
        );
        self.send(ToNetworkMessage::broadcast(msg));
    }

    /// Processes a (already verified) QC: persists the certified block, applies the
    /// commit rule and advances the round. An unknown block starts a state sync
    /// with `source`.
    pub(crate) fn process_qc(
        &mut self,
        qc: &validator::QuorumCert,
        source: Option<validator::PublicKey>,
    ) -> anyhow::Result<()> {
        match self.block_tree.insert_qc(qc) {
            Ok(Some(commit)) => self.on_commit(commit),
            Ok(None) => {}
            Err(BlockTreeError::MissingBlock { round, hash }) => {
                tracing::debug!(
                    "RootBFT replica - QC for round {} refers to unknown block {hash:?} (round {round}), syncing.",
                    qc.round()
                );
                self.start_sync(source);
                return Ok(());
            }
            Err(BlockTreeError::CommitHashMismatch) => {
                tracing::warn!(
                    "RootBFT replica - Ignoring QC for round {} with inconsistent commit hash.",
                    qc.round()
                );
                return Ok(());
            }
            Err(BlockTreeError::Internal(err)) => return Err(err),
        }
        self.safety.update_high_qc(qc)?;
        if self.pacemaker.advance_with_qc(qc) {
            self.start_new_round();
        }
        Ok(())
    }

    /// Processes a (already verified) TC: its high QC first, then the round advance.
    pub(crate) fn process_tc(
        &mut self,
        tc: &validator::TimeoutCert,
        source: Option<validator::PublicKey>,
    ) -> anyhow::Result<()> {
        self.process_qc(tc.high_qc(), source)?;
        if self.block_tree.high_qc().round() < tc.high_qc().round() {
            // Entering the round requires the TC's high QC, wait for the sync.
            return Ok(());
        }
        if self.pacemaker.advance_with_tc(tc) {
            tracing::debug!(
                "RootBFT replica - Round {} timed out, entering round {}.",
                tc.round(),
                self.pacemaker.round()
            );
            self.start_new_round();
        }
        Ok(())
    }

    /// Starts the round the pacemaker just entered and hands the justification to the
    /// proposer.
    pub(crate) fn start_new_round(&mut self) {
        let round = self.pacemaker.round();
        tracing::info!("RootBFT replica - Starting round {round}.");
        self.votes.prune(round);
        let Some(justification) = self.get_justification() else {
            return;
        };
        self.proposer_sender.send_replace(Some(justification));
    }

    /// Justification for proposing in the current round.
    pub(crate) fn get_justification(&self) -> Option<ProposalJustification> {
        let high_qc = self.block_tree.high_qc();
        let parent = self.block_tree.certified_block(high_qc)?;
        Some(ProposalJustification {
            round: self.pacemaker.round(),
            high_qc: high_qc.clone(),
            last_tc: self.pacemaker.last_tc().cloned(),
            pipeline: self.block_tree.pipeline(parent),
            parent: parent.clone(),
            round_start: self.pacemaker.round_start(),
        })
    }

    /// Hands the committed decisions back to the aggregator and the issued certificates
    /// to the shards.
    fn on_commit(&mut self, commit: Commit) {
        for block in &commit.blocks {
            let Some(data) = &block.block else { continue };
            for change in &data.payload.requests {
                let shard = change.shard_key();
                let certified = block
                    .changed
                    .contains(&shard)
                    .then(|| block.state.get(&shard))
                    .flatten();
                self.aggregator
                    .on_commit(shard, change.round().unwrap_or_default(), certified);
            }
        }
        for uc in &commit.certificates {
            tracing::debug!(
                "RootBFT replica - Issuing certificate for shard {} round {}.",
                uc.shard_key(),
                uc.input_record.round_number
            );
            self.send(ToNetworkMessage::certificate(uc.clone()));
        }
        metrics::METRICS
            .certificates_issued
            .inc_by(commit.certificates.len() as u64);
        metrics::METRICS.committed_round.set(commit.head.round().0);
        tracing::info!(
            "RootBFT replica - Committed round {} with root hash {:?}, issued {} certificates.",
            commit.head.round(),
            commit.head.block.root_hash,
            commit.certificates.len()
        );
    }
}

/// Sleeps until the deadline; forever without one.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
