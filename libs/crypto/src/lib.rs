//! Collection of cryptographic primitives used by the root chain.

pub use fmt::*;

pub mod ed25519;
mod fmt;
pub mod sha256;
