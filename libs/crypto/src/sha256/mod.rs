//! Wrappers for the SHA256 cryptographic hash algorithm.
use crate::{ByteFmt, Text, TextFmt};
use sha2::Digest as _;
use std::fmt;

pub mod testonly;

/// SHA256 hash.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha256(pub(crate) [u8; 32]);

impl Sha256 {
    /// Computes a SHA256 hash of a message.
    pub fn new(msg: &[u8]) -> Self {
        Self(sha2::Sha256::new().chain_update(msg).finalize().into())
    }

    /// Wraps raw hash bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the bytes of this hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl ByteFmt for Sha256 {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.try_into()?))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl TextFmt for Sha256 {
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("sha256:")?.decode_hex()
    }

    fn encode(&self) -> String {
        format!("sha256:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Sha256 {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        // Short form for logs.
        write!(fmt, "{}", hex::encode(&self.0[..8]))
    }
}

impl serde::Serialize for Sha256 {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        crate::serialize_text(self, s)
    }
}

impl<'de> serde::Deserialize<'de> for Sha256 {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        crate::deserialize_text(d)
    }
}

/// Canonical hash builder.
///
/// Every field is written in a fixed, unambiguous layout: integers as
/// big-endian, byte strings prefixed with their length, optional values
/// prefixed with a presence flag. The domain tag separates hashes of
/// different message kinds, so that a signature over one kind can never be
/// replayed as another.
pub struct Hasher(sha2::Sha256);

impl Hasher {
    /// Starts a hash in the given domain.
    pub fn new(domain: &str) -> Self {
        Self(sha2::Sha256::new()).bytes(domain.as_bytes())
    }

    /// Writes a u64.
    pub fn u64(mut self, v: u64) -> Self {
        self.0.update(v.to_be_bytes());
        self
    }

    /// Writes a u32.
    pub fn u32(mut self, v: u32) -> Self {
        self.0.update(v.to_be_bytes());
        self
    }

    /// Writes a bool as a single byte.
    pub fn bool(mut self, v: bool) -> Self {
        self.0.update([u8::from(v)]);
        self
    }

    /// Writes a length-prefixed byte string.
    pub fn bytes(self, v: &[u8]) -> Self {
        let mut this = self.u64(v.len() as u64);
        this.0.update(v);
        this
    }

    /// Writes a hash. Hashes have a fixed length, so no prefix is needed.
    pub fn hash(mut self, v: &Sha256) -> Self {
        self.0.update(v.0);
        self
    }

    /// Writes an optional hash.
    pub fn opt_hash(self, v: Option<&Sha256>) -> Self {
        match v {
            Some(v) => self.bool(true).hash(v),
            None => self.bool(false),
        }
    }

    /// Finishes the computation.
    pub fn finish(self) -> Sha256 {
        Sha256(self.0.finalize().into())
    }
}
