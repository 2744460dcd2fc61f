//! Catching up with peers. A replica that learns about blocks it does not have asks a
//! peer for its state: the committed head and the certified blocks above it. Attempts
//! are retried with exponential backoff, each against the next validator; running out
//! of attempts is fatal.
use anyhow::Context as _;
use rootchain_roles::validator::{self, ExecutedBlock, RootMsg, StateMsg, StateRequest};
use tokio::time::Instant;

use super::{HandlerError, StateMachine};
use crate::{io::ToNetworkMessage, metrics};

/// An ongoing state sync.
#[derive(Debug)]
struct Attempt {
    /// Peer asked last.
    peer: validator::PublicKey,
    /// Number of requests sent so far.
    attempt: usize,
    /// When to ask the next peer.
    deadline: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct StateSync {
    active: Option<Attempt>,
}

impl StateSync {
    /// When the ongoing sync should be retried.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.deadline)
    }

    /// Whether a sync is ongoing.
    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

/// Errors that can occur when processing state sync messages.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// The request does not come from a root validator.
    #[error("state request from a non-validator {0:?}")]
    NonValidatorRequester(validator::PublicKey),
    /// Response we did not ask for.
    #[error("unsolicited state response")]
    Unsolicited,
    /// The response is not ahead of our state.
    #[error("state response is not ahead (committed round: {committed}, high QC round: {high_qc})")]
    Old {
        /// Committed round of the response.
        committed: validator::RoundNumber,
        /// Highest QC round of the response.
        high_qc: validator::RoundNumber,
    },
    /// The response does not verify.
    #[error("invalid state response: {0:#}")]
    InvalidMessage(#[source] anyhow::Error),
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError for Error {
    fn is_old(&self) -> bool {
        matches!(self, Self::Unsolicited | Self::Old { .. })
    }

    fn into_internal(self) -> Result<anyhow::Error, Self> {
        match self {
            Self::Internal(err) => Ok(err),
            err => Err(err),
        }
    }
}

impl StateMachine {
    /// Starts a state sync with `peer`, or with another validator when the peer is
    /// unknown or ourselves. Does nothing if a sync is already ongoing.
    pub(crate) fn start_sync(&mut self, peer: Option<validator::PublicKey>) {
        if self.sync.is_active() {
            return;
        }
        let me = self.config.secret_key.public();
        let peer = match peer.filter(|p| *p != me) {
            Some(peer) => peer,
            None => match self.next_peer(&me) {
                Some(peer) => peer,
                None => return,
            },
        };
        self.sync.active = Some(Attempt {
            peer,
            attempt: 1,
            deadline: Instant::now() + self.config.sync_backoff,
        });
        self.send_state_request(peer);
    }

    /// Retries the ongoing sync with the next validator. Fails once the attempts are
    /// exhausted: the replica cannot safely continue on a state it cannot confirm.
    pub(crate) fn on_sync_retry(&mut self) -> anyhow::Result<()> {
        let Some(active) = &self.sync.active else {
            return Ok(());
        };
        let (prev, attempt) = (active.peer, active.attempt);
        if attempt >= self.config.sync_retries {
            anyhow::bail!("state sync failed after {attempt} attempts");
        }
        let peer = self.next_peer(&prev).unwrap_or(prev);
        let backoff = self
            .config
            .sync_backoff
            .saturating_mul(2u32.saturating_pow(attempt as u32));
        tracing::warn!(
            "RootBFT replica - State sync attempt {attempt} timed out, retrying with {peer:?} in {backoff:?}."
        );
        self.sync.active = Some(Attempt {
            peer,
            attempt: attempt + 1,
            deadline: Instant::now() + backoff,
        });
        self.send_state_request(peer);
        Ok(())
    }

    /// The validator after `key` in the trust base, skipping ourselves.
    fn next_peer(&self, key: &validator::PublicKey) -> Option<validator::PublicKey> {
        let me = self.config.secret_key.public();
        let keys: Vec<_> = self.config.trust_base.keys().copied().collect();
        let start = keys.iter().position(|k| k == key).map_or(0, |i| i + 1);
        (0..keys.len())
            .map(|i| keys[(start + i) % keys.len()])
            .find(|k| *k != me)
    }

    fn send_state_request(&self, peer: validator::PublicKey) {
        tracing::info!("RootBFT replica - Requesting state from {peer:?}.");
        metrics::METRICS.state_sync_requests.inc();
        self.send(ToNetworkMessage::to_validator(
            peer,
            RootMsg::StateRequest(StateRequest {
                node_id: self.config.secret_key.public(),
            }),
        ));
    }

    /// Answers a state request with our committed head and certified blocks.
    pub(crate) fn on_state_request(&mut self, req: StateRequest) -> Result<(), Error> {
        if !self.config.trust_base.contains(&req.node_id) {
            return Err(Error::NonValidatorRequester(req.node_id));
        }
        let msg = self.block_tree.state_msg();
        tracing::debug!(
            "RootBFT replica - Answering state request of {:?}: committed round {}, {} blocks.",
            req.node_id,
            msg.committed_head.round(),
            msg.blocks.len()
        );
        self.send(ToNetworkMessage::to_validator(
            req.node_id,
            RootMsg::StateResponse(Box::new(msg)),
        ));
        Ok(())
    }

    /// Adopts the state of a peer, if it is ahead of ours and verifies.
    pub(crate) fn on_state_response(
        &mut self,
        peer: Option<validator::PublicKey>,
        msg: StateMsg,
    ) -> Result<(), Error> {
        if !self.sync.is_active() {
            return Err(Error::Unsolicited);
        }
        let committed = msg.committed_head.round();
        let high_qc = msg
            .blocks
            .last()
            .and_then(|b| b.qc.as_ref())
            .map_or(committed, |qc| qc.round());
        if committed < self.block_tree.committed().round()
            || high_qc <= self.block_tree.high_qc().round()
        {
            return Err(Error::Old { committed, high_qc });
        }
        self.verify_state(&msg).map_err(Error::InvalidMessage)?;

        tracing::info!(
            "RootBFT replica - Adopting state of {peer:?}: committed round {committed}, high QC round {high_qc}."
        );
        self.sync.active = None;
        self.block_tree.reset(msg)?;
        self.aggregator
            .reset(&self.block_tree.committed().block.state);
        metrics::METRICS
            .committed_round
            .set(self.block_tree.committed().round().0);
        let high_qc = self.block_tree.high_qc().clone();
        self.safety.update_high_qc(&high_qc)?;
        if self.pacemaker.advance_with_qc(&high_qc) {
            self.start_new_round();
        }
        Ok(())
    }

    /// Checks that the state forms a certified chain on top of a sealed head.
    fn verify_state(&self, msg: &StateMsg) -> anyhow::Result<()> {
        let tb = &self.config.trust_base;
        let head = &msg.committed_head;
        verify_executed(&head.block)?;
        if head.round() == validator::RoundNumber::GENESIS {
            anyhow::ensure!(
                head.block.hash() == self.config.genesis.hash(),
                "different genesis block"
            );
        } else {
            let commit_qc = head
                .commit_qc
                .as_ref()
                .context("committed head without commit QC")?;
            commit_qc.verify(tb)?;
            anyhow::ensure!(
                commit_qc.commit_hash() == Some(head.block.root_hash),
                "commit QC does not seal the head root hash"
            );
            let qc = head
                .block
                .qc
                .as_ref()
                .context("committed head without QC")?;
            verify_certifies(qc, &head.block, tb)?;
        }
        for (shard, uc) in &head.certificates {
            uc.verify(tb, shard)?;
        }

        let mut parent = &head.block;
        let mut known: Vec<&ExecutedBlock> = vec![parent];
        for block in &msg.blocks {
            anyhow::ensure!(
                block.round() > parent.round(),
                "blocks are not ordered by round"
            );
            verify_executed(block)?;
            let qc = block
                .qc
                .as_ref()
                .with_context(|| format!("block {} without QC", block.round()))?;
            verify_certifies(qc, block, tb)?;
            let data = block
                .block
                .as_ref()
                .context("second genesis block")?;
            anyhow::ensure!(
                known
                    .iter()
                    .any(|b| b.round() == data.qc.round() && b.hash() == data.qc.block_hash()),
                "block {} does not extend the chain",
                block.round()
            );
            known.push(block);
            parent = block;
        }
        Ok(())
    }
}

/// Checks that the block's root hash matches its state.
fn verify_executed(block: &ExecutedBlock) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.state.unicity_tree().root_hash() == block.root_hash,
        "block {} root hash does not match its state",
        block.round()
    );
    Ok(())
}

/// Checks that `qc` is valid and certifies `block`.
fn verify_certifies(
    qc: &validator::QuorumCert,
    block: &ExecutedBlock,
    tb: &validator::TrustBase,
) -> anyhow::Result<()> {
    qc.verify(tb)?;
    anyhow::ensure!(
        qc.vote_info == block.vote_info(),
        "QC does not certify block {}",
        block.round()
    );
    Ok(())
}
