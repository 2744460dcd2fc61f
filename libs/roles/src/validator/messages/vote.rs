//! Votes of root validators.
use super::{BlockHash, EpochNumber, RoundNumber};
use crate::{
    unicity::UnicitySeal,
    validator::{PublicKey, SecretKey, Signature, TrustBase},
};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a vote is about: the voted block and its position in the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    /// Round of the voted block.
    pub round: RoundNumber,
    /// Round of the voted block's parent.
    pub parent_round: RoundNumber,
    /// Epoch of the voted block.
    pub epoch: EpochNumber,
    /// Timestamp of the voted block, in milliseconds.
    pub timestamp: u64,
    /// Hash of the voted block.
    pub block_hash: BlockHash,
    /// Unicity tree root hash after executing the voted block.
    pub current_root_hash: Sha256,
}

impl VoteInfo {
    /// Canonical hash.
    pub fn hash(&self) -> Sha256 {
        Hasher::new("vote-info")
            .u64(self.round.0)
            .u64(self.parent_round.0)
            .u64(self.epoch.0)
            .u64(self.timestamp)
            .hash(&self.block_hash.0)
            .hash(&self.current_root_hash)
            .finish()
    }

    /// Unsigned seal matching this vote info, committing `commit_hash`.
    pub fn seal(&self, commit_hash: Option<Sha256>) -> UnicitySeal {
        UnicitySeal {
            root_chain_round: self.round,
            timestamp: self.timestamp,
            previous_hash: self.hash(),
            hash: commit_hash,
            signatures: BTreeMap::new(),
        }
    }

    /// Checks that the seal was derived from this vote info.
    fn matches(&self, seal: &UnicitySeal) -> bool {
        seal.root_chain_round == self.round
            && seal.timestamp == self.timestamp
            && seal.previous_hash == self.hash()
    }
}

/// A vote for a block. The signature is over the ledger commit info, so that
/// a quorum of votes forms a unicity seal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Voted block.
    pub vote_info: VoteInfo,
    /// Unsigned seal. The hash is set when this vote's QC would commit a block.
    pub ledger_commit_info: UnicitySeal,
    /// Voter.
    pub author: PublicKey,
    /// Signature over `ledger_commit_info.signing_hash()`.
    pub signature: Signature,
}

impl Vote {
    /// Creates a signed vote.
    pub fn new(key: &SecretKey, vote_info: VoteInfo, commit_hash: Option<Sha256>) -> Self {
        let ledger_commit_info = vote_info.seal(commit_hash);
        Self {
            signature: ledger_commit_info.sign(key),
            author: key.public(),
            vote_info,
            ledger_commit_info,
        }
    }

    /// Round of the vote.
    pub fn round(&self) -> RoundNumber {
        self.vote_info.round
    }

    /// Identifies the vote content, excluding the author.
    /// Two votes of the same author with different content are an equivocation.
    pub fn content_hash(&self) -> Sha256 {
        self.ledger_commit_info.signing_hash()
    }

    /// Verifies the vote.
    pub fn verify(&self, trust_base: &TrustBase) -> Result<(), VoteVerifyError> {
        if !trust_base.contains(&self.author) {
            return Err(VoteVerifyError::UnknownAuthor);
        }
        if !self.vote_info.matches(&self.ledger_commit_info) {
            return Err(VoteVerifyError::InconsistentCommitInfo);
        }
        if !self.ledger_commit_info.signatures.is_empty() {
            return Err(VoteVerifyError::SignaturesInCommitInfo);
        }
        if self.vote_info.parent_round >= self.vote_info.round {
            return Err(VoteVerifyError::BadParentRound);
        }
        self.signature
            .verify_hash(&self.content_hash(), &self.author)
            .map_err(|_| VoteVerifyError::InvalidSignature)
    }
}

/// Error returned by `Vote::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum VoteVerifyError {
    /// Author is not a root validator.
    #[error("author is not in the root trust base")]
    UnknownAuthor,
    /// Ledger commit info was not derived from the vote info.
    #[error("ledger commit info does not match vote info")]
    InconsistentCommitInfo,
    /// Ledger commit info of a vote is unsigned.
    #[error("ledger commit info carries signatures")]
    SignaturesInCommitInfo,
    /// Parent round is not below the vote round.
    #[error("parent round is not below the vote round")]
    BadParentRound,
    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,
}
