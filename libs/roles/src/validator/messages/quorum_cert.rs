//! Quorum certificates.
use super::{BlockHash, RoundNumber, Vote, VoteInfo};
use crate::{
    unicity::{UnicitySeal, UnicitySealVerifyError},
    validator::{PublicKey, Signature, TrustBase},
};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A quorum certificate: a quorum of votes with the same content.
/// The vote signatures are collected into `ledger_commit_info`, which makes it the
/// unicity seal of the block this QC commits, if any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCert {
    /// Certified block.
    pub vote_info: VoteInfo,
    /// Seal with the signatures of the voters.
    pub ledger_commit_info: UnicitySeal,
}

impl QuorumCert {
    /// Creates an empty QC for the content of the given vote.
    pub fn new(vote: &Vote) -> Self {
        Self {
            vote_info: vote.vote_info.clone(),
            ledger_commit_info: UnicitySeal {
                signatures: BTreeMap::new(),
                ..vote.ledger_commit_info.clone()
            },
        }
    }

    /// QC of the genesis block. It carries no signatures.
    pub fn genesis(vote_info: VoteInfo) -> Self {
        Self {
            ledger_commit_info: vote_info.seal(Some(vote_info.current_root_hash)),
            vote_info,
        }
    }

    /// Adds a verified vote to the QC.
    pub fn add(&mut self, vote: &Vote) -> Result<(), QuorumCertAddError> {
        if self.ledger_commit_info.signing_hash() != vote.content_hash() {
            return Err(QuorumCertAddError::InconsistentVotes);
        }
        if self.ledger_commit_info.signatures.contains_key(&vote.author) {
            return Err(QuorumCertAddError::Exists);
        }
        self.ledger_commit_info
            .signatures
            .insert(vote.author, vote.signature);
        Ok(())
    }

    /// Round of the certified block.
    pub fn round(&self) -> RoundNumber {
        self.vote_info.round
    }

    /// Round of the certified block's parent.
    pub fn parent_round(&self) -> RoundNumber {
        self.vote_info.parent_round
    }

    /// Hash of the certified block.
    pub fn block_hash(&self) -> BlockHash {
        self.vote_info.block_hash
    }

    /// Root hash committed by this QC, if any.
    pub fn commit_hash(&self) -> Option<Sha256> {
        self.ledger_commit_info.hash
    }

    /// Signatures of the voters.
    pub fn signatures(&self) -> &BTreeMap<PublicKey, Signature> {
        &self.ledger_commit_info.signatures
    }

    /// Canonical hash, covering the signer set.
    pub fn hash(&self) -> Sha256 {
        let mut h = Hasher::new("quorum-cert")
            .hash(&self.vote_info.hash())
            .hash(&self.ledger_commit_info.signing_hash())
            .u64(self.signatures().len() as u64);
        for key in self.signatures().keys() {
            h = h.bytes(key.as_bytes());
        }
        h.finish()
    }

    /// Verifies the QC. The genesis QC is accepted without signatures.
    pub fn verify(&self, trust_base: &TrustBase) -> Result<(), QuorumCertVerifyError> {
        let seal = &self.ledger_commit_info;
        if seal.previous_hash != self.vote_info.hash() {
            return Err(QuorumCertVerifyError::VoteInfoHashMismatch);
        }
        if seal.root_chain_round != self.vote_info.round
            || seal.timestamp != self.vote_info.timestamp
        {
            return Err(QuorumCertVerifyError::SealMismatch);
        }
        if self.round() == RoundNumber::GENESIS {
            if !seal.signatures.is_empty() || self.parent_round() != RoundNumber::GENESIS {
                return Err(QuorumCertVerifyError::BadGenesis);
            }
            return Ok(());
        }
        if self.parent_round() >= self.round() {
            return Err(QuorumCertVerifyError::BadParentRound);
        }
        seal.verify(trust_base)
            .map_err(QuorumCertVerifyError::Signatures)
    }
}

/// Error returned by `QuorumCert::add()`.
#[derive(Debug, thiserror::Error)]
pub enum QuorumCertAddError {
    /// Vote content differs from the QC content.
    #[error("vote content does not match the QC")]
    InconsistentVotes,
    /// Signer already present.
    #[error("signer already present in the QC")]
    Exists,
}

/// Error returned by `QuorumCert::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum QuorumCertVerifyError {
    /// Seal does not reference the vote info.
    #[error("seal previous hash does not match vote info")]
    VoteInfoHashMismatch,
    /// Seal round or timestamp differ from the vote info.
    #[error("seal round or timestamp does not match vote info")]
    SealMismatch,
    /// Malformed genesis QC.
    #[error("malformed genesis QC")]
    BadGenesis,
    /// Parent round is not below the QC round.
    #[error("parent round is not below the QC round")]
    BadParentRound,
    /// Signatures do not satisfy the trust base.
    #[error("signatures: {0:#}")]
    Signatures(#[source] UnicitySealVerifyError),
}
