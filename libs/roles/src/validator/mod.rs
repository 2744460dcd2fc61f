//! Root validator role implementation.

mod keys;
mod messages;
pub mod testonly;
#[cfg(test)]
mod tests;

pub use self::{keys::*, messages::*};
