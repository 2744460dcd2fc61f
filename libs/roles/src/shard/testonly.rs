//! Test-only utilities.
use super::{BlockCertificationRequest, InputRecord, PartitionId, ShardId, ShardKey};
use crate::validator::{
    CertReqReason, EpochNumber, IrChangeRequest, LeaderSelectionMode, SecretKey, TrustBase,
    WeightedValidator,
};
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

impl Distribution<InputRecord> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> InputRecord {
        InputRecord {
            previous_hash: rng.gen(),
            hash: rng.gen(),
            block_hash: Some(rng.gen()),
            summary_value: rng.gen::<[u8; 8]>().to_vec(),
            round_number: rng.gen_range(1..1000),
            epoch: EpochNumber(0),
            timestamp: rng.gen(),
        }
    }
}

/// Shard test setup: validator keys and trust base of one shard.
#[derive(Debug, Clone)]
pub struct ShardSetup {
    /// The shard.
    pub shard: ShardKey,
    /// Shard validators' secret keys.
    pub keys: Vec<SecretKey>,
    /// Shard trust base.
    pub trust_base: TrustBase,
}

impl ShardSetup {
    /// New `ShardSetup` with validators of equal weight.
    pub fn new(rng: &mut impl Rng, shard: ShardKey, validators: usize) -> Self {
        let keys: Vec<SecretKey> = (0..validators).map(|_| rng.gen()).collect();
        let trust_base = TrustBase::new(
            keys.iter().map(|k| WeightedValidator {
                key: k.public(),
                weight: 1,
            }),
            LeaderSelectionMode::RoundRobin,
        )
        .unwrap();
        Self {
            shard,
            keys,
            trust_base,
        }
    }

    /// Shard `(1, 0)` with validators of equal weight.
    pub fn default_shard(rng: &mut impl Rng, validators: usize) -> Self {
        Self::new(rng, ShardKey::new(PartitionId(1), ShardId(0)), validators)
    }

    /// Random input record extending `previous`, if any.
    pub fn next_record(rng: &mut impl Rng, previous: Option<&InputRecord>) -> InputRecord {
        let mut ir: InputRecord = rng.gen();
        if let Some(prev) = previous {
            ir.previous_hash = prev.hash;
            ir.round_number = prev.round_number + 1;
        }
        ir
    }

    /// Certification request of the i-th validator.
    pub fn request(&self, i: usize, ir: &InputRecord) -> BlockCertificationRequest {
        BlockCertificationRequest::new(&self.keys[i], self.shard, ir.clone())
    }

    /// Decision backed by all validators agreeing on `ir`.
    pub fn quorum_change(&self, ir: &InputRecord) -> IrChangeRequest {
        IrChangeRequest {
            partition: self.shard.partition,
            shard: self.shard.shard,
            reason: CertReqReason::Quorum,
            requests: (0..self.keys.len()).map(|i| self.request(i, ir)).collect(),
        }
    }
}
