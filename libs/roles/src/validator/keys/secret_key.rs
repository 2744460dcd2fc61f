use super::{PublicKey, Signature};
use rootchain_crypto::{ed25519, sha256::Sha256, ByteFmt, Text, TextFmt};
use std::{fmt, sync::Arc};

/// A secret key for the validator role.
/// SecretKey is put into an Arc, so that we can clone it,
/// without copying the secret all over the RAM.
#[derive(Clone)]
pub struct SecretKey(pub(crate) Arc<ed25519::SecretKey>);

impl SecretKey {
    /// Generates a secret key from a cryptographically-secure entropy source.
    pub fn generate() -> Self {
        Self(Arc::new(ed25519::SecretKey::generate()))
    }

    /// Public key corresponding to this secret key.
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public())
    }

    /// Signs a message hash.
    pub fn sign_hash(&self, hash: &Sha256) -> Signature {
        Signature(self.0.sign(hash.as_bytes()))
    }
}

impl ByteFmt for SecretKey {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&*self.0)
    }

    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Arc::new).map(Self)
    }
}

impl TextFmt for SecretKey {
    fn encode(&self) -> String {
        format!(
            "validator:secret:ed25519:{}",
            hex::encode(ByteFmt::encode(&*self.0))
        )
    }

    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator:secret:ed25519:")?
            .decode_hex()
            .map(Arc::new)
            .map(Self)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        // The secret itself should never be logged.
        write!(fmt, "<secret for {}>", TextFmt::encode(&self.public()))
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.public() == other.public()
    }
}
