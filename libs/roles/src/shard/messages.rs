//! Messages submitted by shard validators.
use crate::validator::{EpochNumber, PublicKey, SecretKey, Signature, TrustBase};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a partition type (money, tokens, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionTypeId(pub u32);

/// Identifier of a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

/// Identifier of a shard within a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

/// Fully qualified shard identifier. Ordering is by partition, then shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    /// Partition of the shard.
    pub partition: PartitionId,
    /// Shard within the partition.
    pub shard: ShardId,
}

impl ShardKey {
    /// Constructs a shard key.
    pub fn new(partition: PartitionId, shard: ShardId) -> Self {
        Self { partition, shard }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:08x}/{}", self.partition.0, self.shard.0)
    }
}

/// Summary of the state of a shard after one of its rounds.
/// The root chain treats it as opaque apart from the round number and the hash chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    /// State hash before the round.
    pub previous_hash: Sha256,
    /// State hash after the round.
    pub hash: Sha256,
    /// Hash of the block produced in the round, if any.
    pub block_hash: Option<Sha256>,
    /// Summary value of the shard state.
    pub summary_value: Vec<u8>,
    /// Shard round number.
    pub round_number: u64,
    /// Epoch of the shard configuration the round ran in.
    pub epoch: EpochNumber,
    /// Timestamp of the round, in seconds.
    pub timestamp: u64,
}

impl InputRecord {
    /// Canonical hash of the record.
    pub fn hash(&self) -> Sha256 {
        Hasher::new("input-record")
            .hash(&self.previous_hash)
            .hash(&self.hash)
            .opt_hash(self.block_hash.as_ref())
            .bytes(&self.summary_value)
            .u64(self.round_number)
            .u64(self.epoch.0)
            .u64(self.timestamp)
            .finish()
    }
}

/// A shard validator's signed claim that a shard round ended with the given input record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCertificationRequest {
    /// Partition of the shard.
    pub partition: PartitionId,
    /// Shard within the partition.
    pub shard: ShardId,
    /// Shard validator that made the claim.
    pub node_id: PublicKey,
    /// Claimed input record.
    pub input_record: InputRecord,
    /// Signature of `node_id` over `signing_hash()`.
    pub signature: Signature,
}

impl BlockCertificationRequest {
    /// Creates a request signed by `key`.
    pub fn new(key: &SecretKey, shard: ShardKey, input_record: InputRecord) -> Self {
        let hash = Self::hash_fields(&shard, &key.public(), &input_record);
        Self {
            partition: shard.partition,
            shard: shard.shard,
            node_id: key.public(),
            input_record,
            signature: key.sign_hash(&hash),
        }
    }

    /// Shard the request is for.
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::new(self.partition, self.shard)
    }

    /// Shard round the request is for.
    pub fn round(&self) -> u64 {
        self.input_record.round_number
    }

    /// Hash covered by the signature.
    pub fn signing_hash(&self) -> Sha256 {
        Self::hash_fields(&self.shard_key(), &self.node_id, &self.input_record)
    }

    fn hash_fields(shard: &ShardKey, node_id: &PublicKey, ir: &InputRecord) -> Sha256 {
        Hasher::new("block-certification-request")
            .u32(shard.partition.0)
            .u32(shard.shard.0)
            .bytes(node_id.as_bytes())
            .hash(&ir.hash())
            .finish()
    }

    /// Verifies the request against the shard's trust base.
    pub fn verify(&self, trust_base: &TrustBase) -> Result<(), CertificationRequestVerifyError> {
        if !trust_base.contains(&self.node_id) {
            return Err(CertificationRequestVerifyError::UnknownSigner {
                signer: self.node_id,
            });
        }
        self.signature
            .verify_hash(&self.signing_hash(), &self.node_id)
            .map_err(|_| CertificationRequestVerifyError::InvalidSignature)?;
        Ok(())
    }
}

/// Error returned by `BlockCertificationRequest::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum CertificationRequestVerifyError {
    /// Signer is not a validator of the shard.
    #[error("signer {signer:?} is not in the shard trust base")]
    UnknownSigner {
        /// Signer of the request.
        signer: PublicKey,
    },
    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,
}
