use rootchain_certification as certification;
use rootchain_roles::{
    shard::BlockCertificationRequest,
    validator::{self, IrChangeRequest, RootMsg},
};

use super::{HandlerError, StateMachine};
use crate::io::ToNetworkMessage;

/// Errors that can occur when processing shard certification requests and forwarded
/// decisions.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// The shard round is already certified or decided.
    #[error("{0:#}")]
    Old(#[source] certification::Error),
    /// The aggregator rejected the message.
    #[error("rejected: {0:#}")]
    Rejected(#[source] certification::Error),
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<certification::Error> for Error {
    fn from(err: certification::Error) -> Self {
        match err {
            err @ (certification::Error::Old { .. }
            | certification::Error::DecisionPending { .. }) => Self::Old(err),
            err if err.is_internal() => Self::Internal(err.into()),
            err => Self::Rejected(err),
        }
    }
}

impl HandlerError for Error {
    fn is_old(&self) -> bool {
        matches!(self, Self::Old(_))
    }

    fn into_internal(self) -> Result<anyhow::Error, Self> {
        match self {
            Self::Internal(err) => Ok(err),
            err => Err(err),
        }
    }
}

impl StateMachine {
    /// Processes a certification request of a shard validator. A request completing a
    /// decision forwards it to the upcoming leaders.
    pub(crate) fn on_certification_request(
        &mut self,
        req: BlockCertificationRequest,
    ) -> Result<(), Error> {
        let shard = req.shard_key();
        let change = match self.aggregator.add_request(req) {
            Ok(Some(change)) => change,
            Ok(None) => return Ok(()),
            Err(err @ certification::Error::Old { .. }) => {
                // The shard is behind; send it the latest certificate we have.
                if let Some(uc) = self.block_tree.committed().certificates.get(&shard) {
                    self.send(ToNetworkMessage::certificate(uc.clone()));
                }
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        self.forward_change(change);
        Ok(())
    }

    /// Processes a decision forwarded by another root validator.
    pub(crate) fn on_ir_change_request(&mut self, change: IrChangeRequest) -> Result<(), Error> {
        tracing::debug!(
            "RootBFT replica - Received forwarded decision for shard {} round {:?}.",
            change.shard_key(),
            change.round()
        );
        self.aggregator.add_decision(change)?;
        Ok(())
    }

    /// Sends a fresh decision to the leaders of the current and the next round, which
    /// are the ones that can include it in a block soon.
    fn forward_change(&self, change: IrChangeRequest) {
        let me = self.config.secret_key.public();
        let round = self.pacemaker.round();
        let mut leaders: Vec<validator::PublicKey> = vec![
            self.config.trust_base.leader(round),
            self.config.trust_base.leader(round.next()),
        ];
        leaders.dedup();
        for leader in leaders.into_iter().filter(|l| *l != me) {
            tracing::debug!(
                "RootBFT replica - Forwarding decision for shard {} to {leader:?}.",
                change.shard_key()
            );
            self.send(ToNetworkMessage::to_validator(
                leader,
                RootMsg::IrChangeRequest(change.clone()),
            ));
        }
    }
}
