use super::{InvalidSignatureError, PublicKey};
use rootchain_crypto::{ed25519, sha256::Sha256, ByteFmt, Text, TextFmt};
use std::fmt;

/// A signature of a validator over a message hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub(crate) ed25519::Signature);

impl Signature {
    /// Verifies the signature of a message hash against a public key.
    pub fn verify_hash(&self, hash: &Sha256, pk: &PublicKey) -> Result<(), InvalidSignatureError> {
        pk.0.verify(hash.as_bytes(), &self.0)
    }
}

impl ByteFmt for Signature {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl TextFmt for Signature {
    fn encode(&self) -> String {
        format!(
            "validator:signature:ed25519:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator:signature:ed25519:")?
            .decode_hex()
            .map(Self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        rootchain_crypto::serialize_text(self, s)
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        rootchain_crypto::deserialize_text(d)
    }
}
