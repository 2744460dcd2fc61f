//! Timeout messages and timeout certificates.
use super::{EpochNumber, QuorumCert, QuorumCertVerifyError, RoundNumber};
use crate::validator::{PublicKey, SecretKey, Signature, TrustBase, TrustBaseError};
use rootchain_crypto::sha256::{Hasher, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A validator's claim that the round timed out, together with the highest QC it knows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    /// Epoch of the timed out round.
    pub epoch: EpochNumber,
    /// Timed out round.
    pub round: RoundNumber,
    /// Highest QC known to the author.
    pub high_qc: QuorumCert,
}

impl Timeout {
    fn verify(&self, trust_base: &TrustBase) -> Result<(), TimeoutVerifyError> {
        if self.high_qc.round() >= self.round {
            return Err(TimeoutVerifyError::HighQcNotBelowRound);
        }
        self.high_qc
            .verify(trust_base)
            .map_err(TimeoutVerifyError::HighQc)
    }
}

/// Hash signed by a timeout. Only the round of the high QC is signed, which lets a
/// timeout certificate carry a single high QC for all signers.
pub fn timeout_signing_hash(
    round: RoundNumber,
    epoch: EpochNumber,
    high_qc_round: RoundNumber,
    author: &PublicKey,
) -> Sha256 {
    Hasher::new("timeout")
        .u64(round.0)
        .u64(epoch.0)
        .u64(high_qc_round.0)
        .bytes(author.as_bytes())
        .finish()
}

/// A signed timeout message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMsg {
    /// The timeout.
    pub timeout: Timeout,
    /// Author of the timeout.
    pub author: PublicKey,
    /// Signature over `timeout_signing_hash(..)`.
    pub signature: Signature,
    /// TC for the previous round, when the author did not enter the round via a QC.
    pub last_tc: Option<TimeoutCert>,
}

impl TimeoutMsg {
    /// Creates a signed timeout message.
    pub fn new(key: &SecretKey, timeout: Timeout, last_tc: Option<TimeoutCert>) -> Self {
        let author = key.public();
        let hash =
            timeout_signing_hash(timeout.round, timeout.epoch, timeout.high_qc.round(), &author);
        Self {
            timeout,
            author,
            signature: key.sign_hash(&hash),
            last_tc,
        }
    }

    /// Round of the timeout.
    pub fn round(&self) -> RoundNumber {
        self.timeout.round
    }

    /// Verifies the message.
    pub fn verify(&self, trust_base: &TrustBase) -> Result<(), TimeoutVerifyError> {
        if !trust_base.contains(&self.author) {
            return Err(TimeoutVerifyError::UnknownAuthor);
        }
        let t = &self.timeout;
        let hash = timeout_signing_hash(t.round, t.epoch, t.high_qc.round(), &self.author);
        self.signature
            .verify_hash(&hash, &self.author)
            .map_err(|_| TimeoutVerifyError::InvalidSignature)?;
        t.verify(trust_base)?;
        // The author must have entered the round either via a QC or via a TC.
        if t.high_qc.round().next() != t.round {
            let Some(tc) = &self.last_tc else {
                return Err(TimeoutVerifyError::MissingLastTc);
            };
            if tc.round().next() != t.round {
                return Err(TimeoutVerifyError::BadLastTcRound);
            }
        }
        if let Some(tc) = &self.last_tc {
            tc.verify(trust_base)
                .map_err(|err| TimeoutVerifyError::LastTc(Box::new(err)))?;
        }
        Ok(())
    }
}

/// Signature of a timeout certificate signer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSignature {
    /// Round of the signer's high QC.
    pub high_qc_round: RoundNumber,
    /// Signature over `timeout_signing_hash(..)`.
    pub signature: Signature,
}

/// A timeout certificate: a quorum of timeouts for the same round.
/// `timeout.high_qc` is the highest of the signers' high QCs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCert {
    /// The timeout with the highest QC among the signers.
    pub timeout: Timeout,
    /// Signatures of the signers.
    pub signatures: BTreeMap<PublicKey, TimeoutSignature>,
}

impl TimeoutCert {
    /// Creates an empty TC for the given timeout.
    pub fn new(timeout: Timeout) -> Self {
        Self {
            timeout,
            signatures: BTreeMap::new(),
        }
    }

    /// Adds a verified timeout message.
    pub fn add(&mut self, msg: &TimeoutMsg) -> Result<(), TimeoutCertAddError> {
        if msg.timeout.round != self.timeout.round || msg.timeout.epoch != self.timeout.epoch {
            return Err(TimeoutCertAddError::InconsistentTimeouts);
        }
        if self.signatures.contains_key(&msg.author) {
            return Err(TimeoutCertAddError::Exists);
        }
        self.signatures.insert(
            msg.author,
            TimeoutSignature {
                high_qc_round: msg.timeout.high_qc.round(),
                signature: msg.signature,
            },
        );
        if msg.timeout.high_qc.round() > self.timeout.high_qc.round() {
            self.timeout.high_qc = msg.timeout.high_qc.clone();
        }
        Ok(())
    }

    /// Timed out round.
    pub fn round(&self) -> RoundNumber {
        self.timeout.round
    }

    /// Highest QC of the signers.
    pub fn high_qc(&self) -> &QuorumCert {
        &self.timeout.high_qc
    }

    /// Weight of the signers.
    pub fn weight(&self, trust_base: &TrustBase) -> Result<u64, TrustBaseError> {
        trust_base.signers_weight(self.signatures.keys())
    }

    /// Verifies the TC.
    pub fn verify(&self, trust_base: &TrustBase) -> Result<(), TimeoutCertVerifyError> {
        let t = &self.timeout;
        let mut max_high_qc_round = RoundNumber::GENESIS;
        for (key, sig) in &self.signatures {
            if !trust_base.contains(key) {
                return Err(TimeoutCertVerifyError::Signers(
                    TrustBaseError::UnknownSigner(*key),
                ));
            }
            let hash = timeout_signing_hash(t.round, t.epoch, sig.high_qc_round, key);
            sig.signature
                .verify_hash(&hash, key)
                .map_err(|_| TimeoutCertVerifyError::InvalidSignature(*key))?;
            max_high_qc_round = max_high_qc_round.max(sig.high_qc_round);
        }
        trust_base
            .verify_quorum(self.signatures.keys())
            .map_err(TimeoutCertVerifyError::Signers)?;
        if max_high_qc_round != t.high_qc.round() {
            return Err(TimeoutCertVerifyError::HighQcMismatch);
        }
        t.verify(trust_base).map_err(TimeoutCertVerifyError::Timeout)
    }
}

/// Error returned by `TimeoutMsg::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutVerifyError {
    /// Author is not a root validator.
    #[error("author is not in the root trust base")]
    UnknownAuthor,
    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,
    /// High QC is not below the timed out round.
    #[error("high QC is not below the timeout round")]
    HighQcNotBelowRound,
    /// Invalid high QC.
    #[error("high QC: {0:#}")]
    HighQc(#[source] QuorumCertVerifyError),
    /// Round is not justified by the high QC, and there is no TC.
    #[error("missing TC for the previous round")]
    MissingLastTc,
    /// TC is not for the previous round.
    #[error("last TC is not for the previous round")]
    BadLastTcRound,
    /// Invalid TC.
    #[error("last TC: {0:#}")]
    LastTc(#[source] Box<TimeoutCertVerifyError>),
}

/// Error returned by `TimeoutCert::add()`.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutCertAddError {
    /// Timeout is for another round or epoch.
    #[error("timeout does not match the TC")]
    InconsistentTimeouts,
    /// Signer already present.
    #[error("signer already present in the TC")]
    Exists,
}

/// Error returned by `TimeoutCert::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutCertVerifyError {
    /// Signers do not satisfy the trust base.
    #[error("signers: {0:#}")]
    Signers(#[source] TrustBaseError),
    /// Invalid signature.
    #[error("invalid signature from {0:?}")]
    InvalidSignature(PublicKey),
    /// High QC is not the highest of the signed high QC rounds.
    #[error("high QC does not match the signed high QC rounds")]
    HighQcMismatch,
    /// Invalid timeout.
    #[error("timeout: {0:#}")]
    Timeout(#[source] TimeoutVerifyError),
}
