//! Weighted validator sets.
use super::RoundNumber;
use crate::validator::{PublicKey, Signature};
use anyhow::Context as _;
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A weighted set of validators entitled to sign. Used both for the root validators
/// and, per epoch, for the validators of each shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TrustBaseRaw", into = "TrustBaseRaw")]
pub struct TrustBase {
    vec: Vec<WeightedValidator>,
    indexes: BTreeMap<PublicKey, usize>,
    total_weight: u64,
    leader_selection: LeaderSelectionMode,
}

impl TrustBase {
    /// Creates a new TrustBase from a list of validators. Note that the order of the given
    /// validators is NOT preserved: validators are kept sorted by key.
    pub fn new(
        validators: impl IntoIterator<Item = WeightedValidator>,
        leader_selection: LeaderSelectionMode,
    ) -> anyhow::Result<Self> {
        let mut map = BTreeMap::new();
        let mut total_weight: u64 = 0;
        for v in validators {
            anyhow::ensure!(
                !map.contains_key(&v.key),
                "Duplicate validator in TrustBase"
            );
            anyhow::ensure!(v.weight > 0, "Validator weight has to be a positive value");
            total_weight = total_weight
                .checked_add(v.weight)
                .context("Sum of weights overflows in TrustBase")?;
            map.insert(v.key, v);
        }
        anyhow::ensure!(
            !map.is_empty(),
            "TrustBase must contain at least one validator"
        );
        let vec: Vec<_> = map.into_values().collect();
        Ok(Self {
            indexes: vec.iter().enumerate().map(|(i, v)| (v.key, i)).collect(),
            vec,
            total_weight,
            leader_selection,
        })
    }

    /// Iterates over validators.
    pub fn iter(&self) -> impl Iterator<Item = &WeightedValidator> {
        self.vec.iter()
    }

    /// Iterates over validator keys.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.vec.iter().map(|v| &v.key)
    }

    /// Returns the number of validators.
    #[allow(clippy::len_without_is_empty)] // a valid `TrustBase` is always non-empty by construction
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Returns true if the given validator is in the trust base.
    pub fn contains(&self, validator: &PublicKey) -> bool {
        self.indexes.contains_key(validator)
    }

    /// Weight of the given validator, if it is a member.
    pub fn weight(&self, validator: &PublicKey) -> Option<u64> {
        self.indexes.get(validator).map(|i| self.vec[*i].weight)
    }

    /// Sum of all validators' weight.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Signature weight threshold for this trust base.
    pub fn quorum_threshold(&self) -> u64 {
        quorum_threshold(self.total_weight)
    }

    /// Maximal weight of faulty validators tolerated by this trust base.
    pub fn max_faulty_weight(&self) -> u64 {
        max_faulty_weight(self.total_weight)
    }

    /// Leader selection mode.
    pub fn leader_selection(&self) -> LeaderSelectionMode {
        self.leader_selection
    }

    /// Sums the weight of the given signers. Fails if any of them is not a member.
    pub fn signers_weight<'a>(
        &self,
        signers: impl IntoIterator<Item = &'a PublicKey>,
    ) -> Result<u64, TrustBaseError> {
        signers.into_iter().try_fold(0u64, |sum, key| {
            let weight = self
                .weight(key)
                .ok_or(TrustBaseError::UnknownSigner(*key))?;
            Ok(sum + weight)
        })
    }

    /// Checks that the signers are members and that their weight reaches quorum.
    pub fn verify_quorum<'a>(
        &self,
        signers: impl IntoIterator<Item = &'a PublicKey>,
    ) -> Result<(), TrustBaseError> {
        let got = self.signers_weight(signers)?;
        let want = self.quorum_threshold();
        if got < want {
            return Err(TrustBaseError::NotEnoughWeight { got, want });
        }
        Ok(())
    }

    /// Verifies a set of signatures over `hash`: every signer must be a member,
    /// every signature valid, and the total weight must reach quorum.
    pub fn verify_signatures(
        &self,
        hash: &Sha256,
        signatures: &BTreeMap<PublicKey, Signature>,
    ) -> Result<(), TrustBaseError> {
        for (key, sig) in signatures {
            if !self.contains(key) {
                return Err(TrustBaseError::UnknownSigner(*key));
            }
            sig.verify_hash(hash, key)
                .map_err(|_| TrustBaseError::InvalidSignature(*key))?;
        }
        self.verify_quorum(signatures.keys())
    }

    /// Computes the leader of the given round. The result depends only on the round and
    /// the validator set, so all validators agree on it without communication.
    pub fn leader(&self, round: RoundNumber) -> PublicKey {
        match self.leader_selection {
            LeaderSelectionMode::RoundRobin => {
                self.vec[(round.0 % self.vec.len() as u64) as usize].key
            }
            LeaderSelectionMode::Weighted => {
                let eligibility = leader_weighted_eligibility(round, self.total_weight);
                let mut offset = 0;
                for v in &self.vec {
                    offset += v.weight;
                    if eligibility < offset {
                        return v.key;
                    }
                }
                unreachable!()
            }
        }
    }

    /// Canonical hash of the trust base.
    pub fn hash(&self) -> Sha256 {
        let mut h = Hasher::new("trust-base").u64(self.vec.len() as u64);
        for v in &self.vec {
            h = h.bytes(v.key.as_bytes()).u64(v.weight);
        }
        h.u32(self.leader_selection as u32).finish()
    }
}

/// Pseudo-random number in `[0, total_weight)` derived from the round.
fn leader_weighted_eligibility(round: RoundNumber, total_weight: u64) -> u64 {
    let hash = Hasher::new("leader-election").u64(round.0).finish();
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(head) % total_weight
}

/// Validator representation inside a TrustBase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedValidator {
    /// Validator key.
    pub key: PublicKey,
    /// Validator weight inside the TrustBase.
    pub weight: u64,
}

/// The mode used for selecting the leader of a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderSelectionMode {
    /// Select in a round-robin fashion, based on validators' order within the set.
    RoundRobin,
    /// Select pseudo-randomly, proportionally to validators' weights.
    #[default]
    Weighted,
}

#[derive(Serialize, Deserialize)]
struct TrustBaseRaw {
    validators: Vec<WeightedValidator>,
    #[serde(default)]
    leader_selection: LeaderSelectionMode,
}

impl TryFrom<TrustBaseRaw> for TrustBase {
    type Error = anyhow::Error;
    fn try_from(raw: TrustBaseRaw) -> anyhow::Result<Self> {
        Self::new(raw.validators, raw.leader_selection)
    }
}

impl From<TrustBase> for TrustBaseRaw {
    fn from(tb: TrustBase) -> Self {
        Self {
            validators: tb.vec,
            leader_selection: tb.leader_selection,
        }
    }
}

/// Error returned when a set of signers does not satisfy a trust base.
#[derive(Debug, thiserror::Error)]
pub enum TrustBaseError {
    /// Signer is not a member.
    #[error("signer {0:?} is not in the trust base")]
    UnknownSigner(PublicKey),
    /// Signature does not verify.
    #[error("invalid signature from {0:?}")]
    InvalidSignature(PublicKey),
    /// Signers do not reach quorum.
    #[error("signers have not reached quorum: got {got}, want {want}")]
    NotEnoughWeight {
        /// Weight of the signers.
        got: u64,
        /// Quorum threshold.
        want: u64,
    },
}

/// Calculate the maximum allowed weight for faulty validators, for a given total weight.
pub fn max_faulty_weight(total_weight: u64) -> u64 {
    // n = 3*f + 1  =>  f = floor((n - 1) / 3)
    (total_weight - 1) / 3
}

/// Calculate the quorum threshold, the minimum weight of signers needed to certify
/// anything, for a given total weight. This is 2f+1 for n = 3f+1.
pub fn quorum_threshold(total_weight: u64) -> u64 {
    (u128::from(total_weight) * 2 / 3) as u64 + 1
}
