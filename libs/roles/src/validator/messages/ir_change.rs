//! Certification decisions proposed to the root chain.
use crate::{
    shard::{
        BlockCertificationRequest, CertificationRequestVerifyError, InputRecord, PartitionId,
        ShardId, ShardKey,
    },
    validator::TrustBase,
};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Why a shard is included in a proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertReqReason {
    /// A quorum of the shard validators agreed on an input record.
    Quorum,
    /// The submitted requests disagree so much that no input record can reach quorum.
    QuorumNotPossible,
    /// The shard was not certified within its T2 timeout. Its last certified record is
    /// certified again, with a fresh seal, so that the shard can resume.
    T2Timeout,
}

impl CertReqReason {
    fn tag(self) -> u32 {
        match self {
            Self::Quorum => 0,
            Self::QuorumNotPossible => 1,
            Self::T2Timeout => 2,
        }
    }
}

/// Decision of the certification aggregator for one shard round, with the requests
/// it was based on as proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrChangeRequest {
    /// Partition of the shard.
    pub partition: PartitionId,
    /// Shard within the partition.
    pub shard: ShardId,
    /// Decision.
    pub reason: CertReqReason,
    /// Supporting certification requests.
    pub requests: Vec<BlockCertificationRequest>,
}

impl IrChangeRequest {
    /// Shard the decision is for.
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::new(self.partition, self.shard)
    }

    /// Repeat certification of a shard that timed out.
    pub fn t2_timeout(shard: ShardKey) -> Self {
        Self {
            partition: shard.partition,
            shard: shard.shard,
            reason: CertReqReason::T2Timeout,
            requests: vec![],
        }
    }

    /// Shard round the decision is for. `None` for `T2Timeout`, which carries no requests.
    pub fn round(&self) -> Option<u64> {
        self.requests.first().map(BlockCertificationRequest::round)
    }

    /// Canonical hash.
    pub fn hash(&self) -> Sha256 {
        let mut h = Hasher::new("ir-change-request")
            .u32(self.partition.0)
            .u32(self.shard.0)
            .u32(self.reason.tag())
            .u64(self.requests.len() as u64);
        for req in &self.requests {
            h = h
                .hash(&req.signing_hash())
                .bytes(&rootchain_crypto::ByteFmt::encode(&req.signature));
        }
        h.finish()
    }

    /// Verifies the proof against the shard trust base.
    /// Returns the certified input record for `Quorum`, and `None` for `QuorumNotPossible`.
    /// A `T2Timeout` has no proof here; whether the shard timed out depends on the
    /// root chain and is checked against the block it is proposed in.
    pub fn verify(
        &self,
        trust_base: &TrustBase,
    ) -> Result<Option<InputRecord>, IrChangeRequestVerifyError> {
        if self.reason == CertReqReason::T2Timeout {
            if !self.requests.is_empty() {
                return Err(IrChangeRequestVerifyError::UnexpectedRequests);
            }
            return Ok(None);
        }
        let Some(round) = self.round() else {
            return Err(IrChangeRequestVerifyError::NoRequests);
        };
        let mut signers = BTreeSet::new();
        // input record hash -> (weight, record)
        let mut votes: BTreeMap<Sha256, (u64, &InputRecord)> = BTreeMap::new();
        for req in &self.requests {
            if req.shard_key() != self.shard_key() {
                return Err(IrChangeRequestVerifyError::WrongShard);
            }
            if req.round() != round {
                return Err(IrChangeRequestVerifyError::MixedRounds);
            }
            if !signers.insert(req.node_id) {
                return Err(IrChangeRequestVerifyError::DuplicateSigner);
            }
            req.verify(trust_base)?;
            let weight = trust_base.weight(&req.node_id).unwrap_or(0);
            votes
                .entry(req.input_record.hash())
                .or_insert((0, &req.input_record))
                .0 += weight;
        }
        let (best_weight, best) = votes
            .values()
            .max_by_key(|(weight, _)| *weight)
            .copied()
            .ok_or(IrChangeRequestVerifyError::NoRequests)?;
        let quorum = trust_base.quorum_threshold();
        match self.reason {
            CertReqReason::Quorum => {
                if best_weight < quorum {
                    return Err(IrChangeRequestVerifyError::NotEnoughVotes {
                        got: best_weight,
                        want: quorum,
                    });
                }
                Ok(Some(best.clone()))
            }
            CertReqReason::QuorumNotPossible => {
                let submitted: u64 = votes.values().map(|(w, _)| w).sum();
                let missing = trust_base.total_weight() - submitted;
                if best_weight + missing >= quorum {
                    return Err(IrChangeRequestVerifyError::QuorumStillPossible);
                }
                Ok(None)
            }
            CertReqReason::T2Timeout => Err(IrChangeRequestVerifyError::UnexpectedRequests),
        }
    }
}

/// Error returned by `IrChangeRequest::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum IrChangeRequestVerifyError {
    /// No supporting requests.
    #[error("no certification requests")]
    NoRequests,
    /// A request is for another shard.
    #[error("certification request for another shard")]
    WrongShard,
    /// Requests are for different shard rounds.
    #[error("certification requests for different rounds")]
    MixedRounds,
    /// Two requests from the same signer.
    #[error("duplicate signer")]
    DuplicateSigner,
    /// Invalid request.
    #[error("certification request: {0:#}")]
    Request(#[from] CertificationRequestVerifyError),
    /// `Quorum` without a quorum.
    #[error("not enough votes for quorum: got {got}, want {want}")]
    NotEnoughVotes {
        /// Weight behind the best input record.
        got: u64,
        /// Quorum threshold.
        want: u64,
    },
    /// `QuorumNotPossible` while a quorum is still reachable.
    #[error("quorum is still possible")]
    QuorumStillPossible,
    /// `T2Timeout` carrying certification requests.
    #[error("T2 timeout with certification requests")]
    UnexpectedRequests,
}
