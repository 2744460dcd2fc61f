use crate::validator::{PublicKey, RoundNumber, SecretKey, Signature, TrustBase, TrustBaseError};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root validators' signatures over a unicity tree root hash.
///
/// Every vote carries an unsigned seal: the hash is the root hash of the block that
/// the vote's QC would commit. The quorum certificate aggregates the vote signatures
/// into the seal, so a QC that commits a block is also the seal of that block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicitySeal {
    /// Root round in which the seal was signed.
    pub root_chain_round: RoundNumber,
    /// Timestamp of the sealed round, in milliseconds.
    pub timestamp: u64,
    /// Hash of the vote info the seal was signed together with.
    pub previous_hash: Sha256,
    /// Committed unicity tree root hash, if the QC commits anything.
    pub hash: Option<Sha256>,
    /// Signatures of the root validators.
    pub signatures: BTreeMap<PublicKey, Signature>,
}

impl UnicitySeal {
    /// Hash covered by the signatures.
    pub fn signing_hash(&self) -> Sha256 {
        Hasher::new("unicity-seal")
            .u64(self.root_chain_round.0)
            .u64(self.timestamp)
            .hash(&self.previous_hash)
            .opt_hash(self.hash.as_ref())
            .finish()
    }

    /// Signs the seal with `key`, returning the signature. Does not add it to the seal.
    pub fn sign(&self, key: &SecretKey) -> Signature {
        key.sign_hash(&self.signing_hash())
    }

    /// Verifies that the signatures are valid and reach the quorum of the trust base.
    pub fn verify(&self, trust_base: &TrustBase) -> Result<(), UnicitySealVerifyError> {
        trust_base
            .verify_signatures(&self.signing_hash(), &self.signatures)
            .map_err(UnicitySealVerifyError::Signatures)
    }
}

/// Error returned by `UnicitySeal::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum UnicitySealVerifyError {
    /// Signatures do not satisfy the trust base.
    #[error("signatures: {0:#}")]
    Signatures(#[source] TrustBaseError),
}
