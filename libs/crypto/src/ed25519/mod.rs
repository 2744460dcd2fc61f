//! ed25519 keys and signatures over `ed25519_dalek`.
//! Verification is strict: malleable signatures and small-order keys are rejected.

use crate::ByteFmt;
use anyhow::Context as _;
use ed::Signer as _;
use ed25519_dalek as ed;
use std::{cmp::Ordering, hash};

pub mod testonly;

/// ed25519 secret key.
pub struct SecretKey(ed::SigningKey);

impl SecretKey {
    /// Generates a key from the OS entropy source.
    pub fn generate() -> Self {
        Self(ed::SigningKey::generate(&mut rand::rngs::OsRng {}))
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature(self.0.sign(msg))
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

impl ByteFmt for SecretKey {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(ed::SigningKey::from_bytes(bytes.try_into()?)))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }
}

/// ed25519 public key, ordered and hashed by its compressed bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(ed::VerifyingKey);

impl PublicKey {
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> Result<(), InvalidSignatureError> {
        self.0
            .verify_strict(msg, &sig.0)
            .map_err(|_| InvalidSignatureError)
    }

    pub fn as_bytes(&self) -> &[u8; ed::PUBLIC_KEY_LENGTH] {
        self.0.as_bytes()
    }
}

impl ByteFmt for PublicKey {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ed::VerifyingKey::from_bytes(bytes.try_into()?)
            .context("invalid key material")
            .map(Self)
    }

    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl hash::Hash for PublicKey {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

/// ed25519 signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(ed::Signature);

impl ByteFmt for Signature {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(ed::Signature::from_bytes(bytes.try_into()?)))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }
}

impl hash::Hash for Signature {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.0.to_bytes().hash(state);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid signature")]
pub struct InvalidSignatureError;
