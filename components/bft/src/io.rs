//! Input and output messages of the bft component.
use rootchain_roles::{
    shard::{BlockCertificationRequest, ShardKey},
    unicity::UnicityCertificate,
    validator::{
        IrChangeRequest, Proposal, PublicKey, RootMsg, StateMsg, StateRequest, TimeoutMsg, Vote,
    },
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Message received from the network.
#[derive(Debug)]
pub struct FromNetworkMessage {
    /// Authenticated sender: a root validator, or `None` for shard validators.
    pub peer: Option<PublicKey>,
    /// The message.
    pub msg: InboundMsg,
}

/// Closed set of messages the bft component processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMsg {
    /// Block proposal of a round leader.
    Proposal(Proposal),
    /// Vote for a proposal.
    Vote(Vote),
    /// Round timeout.
    Timeout(TimeoutMsg),
    /// Request for our latest state.
    StateRequest(StateRequest),
    /// Latest state of a peer.
    StateResponse(Box<StateMsg>),
    /// Aggregator decision forwarded by another root validator.
    IrChangeRequest(IrChangeRequest),
    /// Certification request of a shard validator.
    CertificationRequest(BlockCertificationRequest),
}

impl From<RootMsg> for InboundMsg {
    fn from(msg: RootMsg) -> Self {
        match msg {
            RootMsg::Proposal(m) => Self::Proposal(m),
            RootMsg::Vote(m) => Self::Vote(m),
            RootMsg::Timeout(m) => Self::Timeout(m),
            RootMsg::StateRequest(m) => Self::StateRequest(m),
            RootMsg::StateResponse(m) => Self::StateResponse(m),
            RootMsg::IrChangeRequest(m) => Self::IrChangeRequest(m),
        }
    }
}

/// Recipient of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// All root validators, including ourselves.
    Broadcast,
    /// A single root validator.
    Validator(PublicKey),
    /// Validators of a shard.
    Shard(ShardKey),
}

/// Payload of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMsg {
    /// Message for root validators.
    Root(RootMsg),
    /// Certificate for shard validators.
    Certificate(UnicityCertificate),
}

/// Message to be sent by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToNetworkMessage {
    /// Recipient.
    pub target: Target,
    /// The message.
    pub msg: OutboundMsg,
}

impl ToNetworkMessage {
    /// Message to all root validators.
    pub fn broadcast(msg: RootMsg) -> Self {
        Self {
            target: Target::Broadcast,
            msg: OutboundMsg::Root(msg),
        }
    }

    /// Message to a single root validator.
    pub fn to_validator(key: PublicKey, msg: RootMsg) -> Self {
        Self {
            target: Target::Validator(key),
            msg: OutboundMsg::Root(msg),
        }
    }

    /// Certificate for the validators of its shard.
    pub fn certificate(uc: UnicityCertificate) -> Self {
        Self {
            target: Target::Shard(uc.shard_key()),
            msg: OutboundMsg::Certificate(uc),
        }
    }
}

/// Capacity of the inbound channel.
pub const INBOUND_CAPACITY: usize = 1024;

/// Creates a new input channel for the network messages.
pub fn create_input_channel() -> (
    mpsc::Sender<FromNetworkMessage>,
    mpsc::Receiver<FromNetworkMessage>,
) {
    mpsc::channel(INBOUND_CAPACITY)
}

/// Delivers a message to a bft component within `timeout`. A message that cannot be
/// delivered in time is dropped and logged. Returns whether it was delivered.
pub async fn deliver(
    sender: &mpsc::Sender<FromNetworkMessage>,
    msg: FromNetworkMessage,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, sender.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            tracing::debug!("deliver(): receiver closed");
            false
        }
        Err(_) => {
            tracing::warn!("deliver(): timed out after {timeout:?}, dropping message");
            false
        }
    }
}
