//! Blocks and proposals.
use super::{
    EpochNumber, IrChangeRequest, QuorumCert, QuorumCertVerifyError, RoundNumber, TimeoutCert,
    TimeoutCertVerifyError,
};
use crate::validator::{PublicKey, SecretKey, Signature, TrustBase};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// Hash of a block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub Sha256);

impl fmt::Debug for BlockHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "block:{}", self.0)
    }
}

/// Shard decisions included in a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// At most one decision per shard.
    pub requests: Vec<IrChangeRequest>,
}

impl Payload {
    /// Canonical hash.
    pub fn hash(&self) -> Sha256 {
        let mut h = Hasher::new("payload").u64(self.requests.len() as u64);
        for req in &self.requests {
            h = h.hash(&req.hash());
        }
        h.finish()
    }

    /// Checks that every shard appears at most once.
    fn verify(&self) -> Result<(), ProposalVerifyError> {
        let mut shards = BTreeSet::new();
        for req in &self.requests {
            if !shards.insert(req.shard_key()) {
                return Err(ProposalVerifyError::DuplicateShard);
            }
        }
        Ok(())
    }
}

/// A block proposed by the leader of a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// Leader that proposed the block.
    pub author: PublicKey,
    /// Round of the block.
    pub round: RoundNumber,
    /// Epoch of the root validator set.
    pub epoch: EpochNumber,
    /// Leader's wall clock at proposal time, in milliseconds.
    pub timestamp: u64,
    /// Shard decisions.
    pub payload: Payload,
    /// QC of the parent block.
    pub qc: QuorumCert,
}

impl BlockData {
    /// Canonical hash of the block.
    pub fn hash(&self) -> BlockHash {
        BlockHash(
            Hasher::new("block")
                .bytes(self.author.as_bytes())
                .u64(self.round.0)
                .u64(self.epoch.0)
                .u64(self.timestamp)
                .hash(&self.payload.hash())
                .hash(&self.qc.hash())
                .finish(),
        )
    }
}

/// A signed block proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposed block.
    pub block: BlockData,
    /// TC for the previous round, when the block does not extend the previous round's QC.
    pub last_round_tc: Option<TimeoutCert>,
    /// Signature of the author over the block hash.
    pub signature: Signature,
}

impl Proposal {
    /// Creates a signed proposal.
    pub fn new(key: &SecretKey, block: BlockData, last_round_tc: Option<TimeoutCert>) -> Self {
        Self {
            signature: key.sign_hash(&block.hash().0),
            block,
            last_round_tc,
        }
    }

    /// Round of the proposal.
    pub fn round(&self) -> RoundNumber {
        self.block.round
    }

    /// Author of the proposal.
    pub fn author(&self) -> &PublicKey {
        &self.block.author
    }

    /// Verifies the proposal. Does not check that the author is the leader of the round.
    pub fn verify(&self, trust_base: &TrustBase) -> Result<(), ProposalVerifyError> {
        let block = &self.block;
        if !trust_base.contains(&block.author) {
            return Err(ProposalVerifyError::UnknownAuthor);
        }
        self.signature
            .verify_hash(&block.hash().0, &block.author)
            .map_err(|_| ProposalVerifyError::InvalidSignature)?;
        if block.qc.round() >= block.round {
            return Err(ProposalVerifyError::QcNotBelowRound);
        }
        block
            .qc
            .verify(trust_base)
            .map_err(ProposalVerifyError::Qc)?;
        if block.qc.round().next() != block.round {
            let Some(tc) = &self.last_round_tc else {
                return Err(ProposalVerifyError::MissingTc);
            };
            if tc.round().next() != block.round {
                return Err(ProposalVerifyError::BadTcRound);
            }
        }
        if let Some(tc) = &self.last_round_tc {
            tc.verify(trust_base).map_err(ProposalVerifyError::Tc)?;
        }
        block.payload.verify()
    }
}

/// Error returned by `Proposal::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum ProposalVerifyError {
    /// Author is not a root validator.
    #[error("author is not in the root trust base")]
    UnknownAuthor,
    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,
    /// QC is not below the block round.
    #[error("QC round is not below the block round")]
    QcNotBelowRound,
    /// Invalid QC.
    #[error("qc: {0:#}")]
    Qc(#[source] QuorumCertVerifyError),
    /// Round does not follow the QC, and there is no TC.
    #[error("missing TC for the previous round")]
    MissingTc,
    /// TC is not for the previous round.
    #[error("TC is not for the previous round")]
    BadTcRound,
    /// Invalid TC.
    #[error("tc: {0:#}")]
    Tc(#[source] TimeoutCertVerifyError),
    /// A shard appears twice in the payload.
    #[error("shard appears twice in the payload")]
    DuplicateShard,
}
