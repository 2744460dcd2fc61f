//! Configuration of the root chain validator binaries.
mod config;


pub use config::{decode_json, encode_json, AppConfig, ConfigPaths, Configs, ShardGenesis};
