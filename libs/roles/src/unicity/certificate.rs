use super::{UnicitySeal, UnicitySealVerifyError, UnicityTreeCertificate};
use crate::{
    shard::{InputRecord, ShardKey},
    validator::TrustBase,
};
use serde::{Deserialize, Serialize};

/// Proof that the root chain certified `input_record` for a shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicityCertificate {
    /// Certified input record.
    pub input_record: InputRecord,
    /// Path binding the record into the sealed root hash.
    pub tree_certificate: UnicityTreeCertificate,
    /// Root validators' seal.
    pub seal: UnicitySeal,
}

impl UnicityCertificate {
    /// Shard the certificate is for.
    pub fn shard_key(&self) -> ShardKey {
        self.tree_certificate.shard_key()
    }

    /// Verifies the certificate for the given shard against the root trust base.
    pub fn verify(
        &self,
        trust_base: &TrustBase,
        shard: &ShardKey,
    ) -> Result<(), UnicityCertificateVerifyError> {
        if self.shard_key() != *shard {
            return Err(UnicityCertificateVerifyError::WrongShard {
                got: self.shard_key(),
                want: *shard,
            });
        }
        let Some(sealed) = self.seal.hash else {
            return Err(UnicityCertificateVerifyError::MissingRootHash);
        };
        if self.tree_certificate.root_hash(&self.input_record.hash()) != sealed {
            return Err(UnicityCertificateVerifyError::RootHashMismatch);
        }
        self.seal
            .verify(trust_base)
            .map_err(UnicityCertificateVerifyError::Seal)
    }
}

/// Error returned by `UnicityCertificate::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum UnicityCertificateVerifyError {
    /// Certificate is for another shard.
    #[error("certificate for shard {got}, want {want}")]
    WrongShard {
        /// Shard of the certificate.
        got: ShardKey,
        /// Expected shard.
        want: ShardKey,
    },
    /// Seal does not commit a root hash.
    #[error("seal without root hash")]
    MissingRootHash,
    /// Path does not lead to the sealed root hash.
    #[error("tree certificate does not match the sealed root hash")]
    RootHashMismatch,
    /// Invalid seal.
    #[error("seal: {0:#}")]
    Seal(#[source] UnicitySealVerifyError),
}
