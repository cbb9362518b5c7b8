//! Configuration Module
//!
//! Network endpoints and the signing key come from the environment (with a
//! `.env` file filling in unset values) and are validated once at startup.
//! Run settings describe one preallocate/upload/download pass.

mod network;
mod run;

pub use network::{NetworkConfig, PrivateKey, EVM_RPC_VAR, INDEXER_RPC_VAR, PRIVATE_KEY_VAR};
pub use run::{RunConfig, DEFAULT_FILE_SIZE, DEFAULT_FRAGMENT_SIZE};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid URL in {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Failed to load env file: {0}")]
    EnvFile(String),

    #[error("Invalid run setting: {0}")]
    InvalidRun(String),
}
