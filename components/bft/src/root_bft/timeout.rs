use rootchain_roles::validator::{self, RootMsg};

use super::{pacemaker::TimeoutStatus, safety::SafetyError, HandlerError, StateMachine};
use crate::metrics;

/// Errors that can occur when processing a Timeout message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Past round.
    #[error("past round (timeout round: {round}, current round: {current_round})")]
    Old {
        /// Round of the timeout.
        round: validator::RoundNumber,
        /// Current round.
        current_round: validator::RoundNumber,
    },
    /// Round ahead of ours, even after processing the carried certificates.
    #[error("future round (timeout round: {round}, current round: {current_round})")]
    FutureRound {
        /// Round of the timeout.
        round: validator::RoundNumber,
        /// Current round.
        current_round: validator::RoundNumber,
    },
    /// Same timeout received before.
    #[error("duplicate timeout from {author:?} for round {round}")]
    Duplicate {
        /// Round of the timeout.
        round: validator::RoundNumber,
        /// Author of the timeout.
        author: validator::PublicKey,
    },
    /// Invalid message.
    #[error("invalid message: {0:#}")]
    InvalidMessage(#[source] validator::TimeoutVerifyError),
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
    /// Processes a Timeout message.
    pub(crate) fn on_timeout(&mut self, msg: validator::TimeoutMsg) -> Result<(), Error> {
        // ----------- Checking origin of the message --------------

        let round = msg.round();
        let author = msg.author;

        // If the message is from a past round, ignore it.
        if round < self.pacemaker.round() {
            return Err(Error::Old {
                round,
                current_round: self.pacemaker.round(),
            });
        }

        // ----------- Checking the signed part of the message --------------

        msg.verify(&self.config.trust_base)
            .map_err(Error::InvalidMessage)?;

        // ----------- All checks finished. Now we process the message. --------------

        tracing::debug!(
            bft_message = format!("{:#?}", msg),
            "RootBFT replica - Received a timeout for round {round} from {author:?}."
        );

        // The certificates carried by the message may move us forward.
        self.process_qc(&msg.timeout.high_qc, Some(author))?;
        if let Some(tc) = &msg.last_tc {
            self.process_tc(tc, Some(author))?;
        }
        if round < self.pacemaker.round() {
            return Ok(());
        }
        if round > self.pacemaker.round() {
            return Err(Error::FutureRound {
                round,
                current_round: self.pacemaker.round(),
            });
        }

        let status = match self.pacemaker.add_timeout(&msg, &self.config.trust_base) {
            Ok(status) => status,
            Err(validator::TimeoutCertAddError::Exists) => {
                return Err(Error::Duplicate { round, author })
            }
            Err(err) => return Err(anyhow::Error::from(err).into()),
        };
        match status {
            TimeoutStatus::Certified(tc) => {
                tracing::info!(
                    "RootBFT replica - We have a TC with {} signatures at round {}.",
                    tc.signatures.len(),
                    tc.round()
                );
                self.process_tc(&tc, Some(author))?;
            }
            // Once more than the faulty weight timed out in our round, the round cannot
            // produce a QC without us, so we join the timeout.
            TimeoutStatus::Collecting { weight }
                if round == self.pacemaker.round()
                    && weight > self.config.trust_base.max_faulty_weight()
                    && self.pacemaker.timeout_msg().is_none() =>
            {
                tracing::debug!(
                    "RootBFT replica - Timeouts for round {round} exceed the faulty weight, timing out."
                );
                self.on_round_timeout()?;
            }
            TimeoutStatus::Collecting { .. } => {}
        }
        Ok(())
    }

    /// Handles the expiry of the round timer: broadcasts our timeout for the round,
    /// or rebroadcasts it if we already timed out.
    pub(crate) fn on_round_timeout(&mut self) -> anyhow::Result<()> {
        if let Some(msg) = self.pacemaker.timeout_msg() {
            tracing::debug!(
                "RootBFT replica - Round {} still timed out, rebroadcasting.",
                self.pacemaker.round()
            );
            let msg = msg.clone();
            self.pacemaker.rearm();
            self.broadcast(RootMsg::Timeout(msg));
            return Ok(());
        }

        let round = self.pacemaker.round();
        tracing::info!("RootBFT replica - Round {round} timed out.");
        let timeout = validator::Timeout {
            epoch: self.config.epoch(),
            round,
            high_qc: self.block_tree.high_qc().clone(),
        };
        let msg = match self
            .safety
            .sign_timeout(timeout, self.pacemaker.last_tc().cloned())
        {
            Ok(msg) => msg,
            Err(SafetyError::Internal(err)) => return Err(err),
            Err(err) => {
                tracing::warn!("RootBFT replica - Not timing out round {round}: {err:#}");
                self.pacemaker.rearm();
                return Ok(());
            }
        };
        metrics::METRICS.timeouts.inc();
        self.pacemaker.set_timeout_msg(msg.clone());
        self.broadcast(RootMsg::Timeout(msg));
        Ok(())
    }
}
