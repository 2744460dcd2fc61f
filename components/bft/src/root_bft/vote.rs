use rootchain_roles::validator;

use super::{vote_register::VoteRegisterError, HandlerError, StateMachine};

/// Errors that can occur when processing a Vote message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Past round.
    #[error("past round (vote round: {round}, current round: {current_round})")]
    Old {
        /// Round of the vote.
        round: validator::RoundNumber,
        /// Current round.
        current_round: validator::RoundNumber,
    },
    /// Round too far ahead of ours.
    #[error("future round (vote round: {round}, current round: {current_round})")]
    FutureRound {
        /// Round of the vote.
        round: validator::RoundNumber,
        /// Current round.
        current_round: validator::RoundNumber,
    },
    /// Same vote received before.
    #[error("duplicate vote from {author:?} for round {round}")]
    Duplicate {
        /// Round of the vote.
        round: validator::RoundNumber,
        /// Author of the vote.
        author: validator::PublicKey,
    },
    /// Invalid message.
    #[error("invalid message: {0:#}")]
    InvalidMessage(#[source] validator::VoteVerifyError),
    /// The author voted for different content in the round before. Only its first
    /// vote counts.
    #[error("equivocating vote from {author:?} for round {round}")]
    Equivocation {
        /// Round of the vote.
        round: validator::RoundNumber,
        /// Author of the vote.
        author: validator::PublicKey,
    },
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
            Self::Internal(err) => Ok(err),
            err => Err(err),
        }
    }
}

impl StateMachine {
    /// Processes a Vote message.
    pub(crate) fn on_vote(&mut self, vote: validator::Vote) -> Result<(), Error> {
        // ----------- Checking origin of the message --------------

        let round = vote.round();
        let author = vote.author;

        // If the message is from a past round, ignore it.
        if round < self.pacemaker.round() {
            return Err(Error::Old {
                round,
                current_round: self.pacemaker.round(),
            });
        }

        // Votes for the next round can arrive before the QC of ours. Anything further
        // ahead is not kept.
        if round > self.pacemaker.round().next() {
            return Err(Error::FutureRound {
                round,
                current_round: self.pacemaker.round(),
            });
        }

        // ----------- Checking the signed part of the message --------------

        vote.verify(&self.config.trust_base)
            .map_err(Error::InvalidMessage)?;

        // ----------- All checks finished. Now we process the message. --------------

        tracing::debug!(
            bft_message = format!("{:#?}", vote),
            "RootBFT replica - Received a vote for round {round} from {author:?}."
        );
        let qc = match self.votes.insert(&vote, &self.config.trust_base) {
            Ok(qc) => qc,
            Err(VoteRegisterError::Duplicate) => return Err(Error::Duplicate { round, author }),
            Err(VoteRegisterError::Equivocation { author }) => {
                return Err(Error::Equivocation { round, author })
            }
            Err(VoteRegisterError::Add(err)) => return Err(anyhow::Error::from(err).into()),
        };

        // Now we check if we have enough weight to continue. If not, we wait for more messages.
        let Some(qc) = qc else {
            return Ok(());
        };

        // ----------- We have a QC. Now we process it. --------------

        tracing::info!(
            "RootBFT replica - We have a QC with {} signatures at round {} for block {:?}.",
            qc.signatures().len(),
            qc.round(),
            qc.block_hash(),
        );
        self.process_qc(&qc, Some(author))?;
        Ok(())
    }
}
