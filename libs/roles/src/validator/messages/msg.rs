//! Messages exchanged between root validators.
use super::{IrChangeRequest, Proposal, StateMsg, StateRequest, TimeoutMsg, Vote};
use serde::{Deserialize, Serialize};

/// Closed set of messages exchanged between root validators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootMsg {
    /// Block proposal of a round leader.
    Proposal(Proposal),
    /// Vote for a proposal.
    Vote(Vote),
    /// Round timeout.
    Timeout(TimeoutMsg),
    /// Request for the sender's latest state.
    StateRequest(StateRequest),
    /// Latest state, in response to a `StateRequest`.
    StateResponse(Box<StateMsg>),
    /// Aggregator decision forwarded to the upcoming leaders.
    IrChangeRequest(IrChangeRequest),
}

impl RootMsg {
    /// Returns the name of the message variant.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "Proposal",
            Self::Vote(_) => "Vote",
            Self::Timeout(_) => "Timeout",
            Self::StateRequest(_) => "StateRequest",
            Self::StateResponse(_) => "StateResponse",
            Self::IrChangeRequest(_) => "IrChangeRequest",
        }
    }
}
