//! This tool generates a validator key pair and prints it to stdout.
#![allow(clippy::print_stdout)]

use rootchain_crypto::TextFmt as _;
use rootchain_roles::validator;

/// This tool generates a validator key pair and prints it to stdout.
fn main() {
    let key = validator::SecretKey::generate();
    println!("keys:");
    println!("{}", key.encode());
    println!("{}", key.public().encode());
}
