use rootchain_roles::validator::{self, RootMsg};

use super::{
    block_tree,
    payload::{self, PayloadError},
    safety::SafetyError,
    HandlerError, StateMachine,
};
use crate::metrics;

/// Errors that can occur when processing a Proposal message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Past round.
    #[error("past round (proposal round: {round}, current round: {current_round})")]
    Old {
        /// Round of the proposal.
        round: validator::RoundNumber,
        /// Current round.
        current_round: validator::RoundNumber,
    },
    /// Same proposal received before.
    #[error("duplicate proposal for round {round}")]
    Duplicate {
        /// Round of the proposal.
        round: validator::RoundNumber,
    },
    /// Invalid leader.
    #[error(
        "invalid leader (correct leader: {correct_leader:?}, received leader: {received_leader:?})"
    )]
    InvalidLeader {
        /// Correct leader.
        correct_leader: validator::PublicKey,
        /// Received leader.
        received_leader: validator::PublicKey,
    },
    /// Invalid message.
    #[error("invalid message: {0:#}")]
    InvalidMessage(#[source] validator::ProposalVerifyError),
    /// The proposal is for a round we could not enter with its QC and TC.
    #[error("future round (proposal round: {round}, current round: {current_round})")]
    FutureRound {
        /// Round of the proposal.
        round: validator::RoundNumber,
        /// Current round.
        current_round: validator::RoundNumber,
    },
    /// The block does not extend the highest QC we know.
    #[error("stale QC (block QC round: {qc_round}, high QC round: {high_qc_round})")]
    StaleQc {
        /// Round of the block's QC.
        qc_round: validator::RoundNumber,
        /// Round of our high QC.
        high_qc_round: validator::RoundNumber,
    },
    /// The leader proposed a different block for the round before.
    #[error("equivocating proposal for round {round} from {author:?}")]
    Equivocation {
        /// Round of the proposal.
        round: validator::RoundNumber,
        /// The leader.
        author: validator::PublicKey,
    },
    /// The parent block is unknown; a state sync was started.
    #[error("missing parent block (round: {round})")]
    MissingParent {
        /// Round of the parent block.
        round: validator::RoundNumber,
    },
    /// Invalid payload.
    #[error("invalid payload: {0:#}")]
    InvalidPayload(#[source] PayloadError),
    /// The safety rules forbid voting.
    #[error("not voting: {0:#}")]
    Safety(#[source] SafetyError),
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError for Error {
    fn is_old(&self) -> bool {
        matches!(self, Self::Old { .. } | Self::Duplicate { .. })
    }

    fn into_internal(self) -> Result<anyhow::Error, Self> {
        match self {
            Self::Internal(err)
            | Self::InvalidPayload(PayloadError::Internal(err))
            | Self::Safety(SafetyError::Internal(err)) => Ok(err),
            err => Err(err),
        }
    }
}

impl StateMachine {
    /// Processes a Proposal message.
    pub(crate) fn on_proposal(&mut self, proposal: validator::Proposal) -> Result<(), Error> {
        // ----------- Checking origin of the message --------------

        let round = proposal.round();
        let author = *proposal.author();

        // If the message is from a past round, ignore it.
        if round < self.pacemaker.round() {
            return Err(Error::Old {
                round,
                current_round: self.pacemaker.round(),
            });
        }

        // Check that it comes from the correct leader.
        let leader = self.config.trust_base.leader(round);
        if author != leader {
            return Err(Error::InvalidLeader {
                correct_leader: leader,
                received_leader: author,
            });
        }

        // ----------- Checking the contents of the message --------------

        proposal
            .verify(&self.config.trust_base)
            .map_err(Error::InvalidMessage)?;

        // The QC and TC of the proposal may let us enter its round.
        self.process_qc(&proposal.block.qc, Some(author))?;
        if let Some(tc) = &proposal.last_round_tc {
            self.process_tc(tc, Some(author))?;
        }
        if round != self.pacemaker.round() {
            return Err(Error::FutureRound {
                round,
                current_round: self.pacemaker.round(),
            });
        }

        let high_qc_round = self.block_tree.high_qc().round();
        if proposal.block.qc.round() < high_qc_round {
            return Err(Error::StaleQc {
                qc_round: proposal.block.qc.round(),
                high_qc_round,
            });
        }

        if let Some(existing) = self.block_tree.block_at(round) {
            if existing.hash() == proposal.block.hash() {
                return Err(Error::Duplicate { round });
            }
            return Err(Error::Equivocation { round, author });
        }

        let Some(parent) = self.block_tree.certified_block(&proposal.block.qc) else {
            self.start_sync(Some(author));
            return Err(Error::MissingParent {
                round: proposal.block.qc.round(),
            });
        };

        let pipeline = self.block_tree.pipeline(parent);
        let block = payload::execute(
            &self.config,
            &self.aggregator,
            parent,
            &pipeline,
            proposal.block.clone(),
        )
        .map_err(Error::InvalidPayload)?;
        let commit_hash = block_tree::commit_hash(parent);

        // ----------- All checks finished. Now we process the message. --------------

        tracing::debug!(
            bft_message = format!("{:#?}", proposal),
            "RootBFT replica - Received a proposal for round {round} from {author:?}."
        );
        metrics::METRICS
            .proposal_latency
            .observe(self.pacemaker.round_start().elapsed());

        let vote = self
            .safety
            .sign_vote(&block, proposal.last_round_tc.as_ref(), commit_hash)
            .map_err(Error::Safety)?;
        self.block_tree.add(block);

        // Votes are sent to everyone, so that every replica forms the QC.
        self.broadcast(RootMsg::Vote(vote));
        Ok(())
    }
}
