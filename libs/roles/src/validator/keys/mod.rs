//! Keys and signatures used by the validators, both at root and at shard level.

mod public_key;
mod secret_key;
mod signature;
mod testonly;

pub use public_key::PublicKey;
pub use rootchain_crypto::ed25519::InvalidSignatureError;
pub use secret_key::SecretKey;
pub use signature::Signature;
