//! storage-roundtrip - Fragment upload/download through a decentralized storage network
//!
//! Creates a placeholder file of a chosen size, uploads it in fragments
//! through a storage network (indexer-selected nodes, one ledger commitment
//! per fragment) and downloads it back by the returned content roots.
//! Node selection, commitments and content addressing belong to the network
//! behind [`network::StorageNetwork`]; this crate orchestrates them.

pub mod config;
pub mod driver;
pub mod files;
pub mod network;
pub mod transfer;

pub use config::{NetworkConfig, RunConfig};
pub use driver::{Driver, RunReport, StagePolicies, StagePolicy};
pub use network::{LocalNetwork, RootId, StorageNetwork, TxId, UploadReceipt};
pub use transfer::{DownloadOrchestrator, UploadOrchestrator};

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for storage-roundtrip operations
#[derive(Error, Debug)]
pub enum RoundtripError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("File error: {0}")]
    File(#[from] files::FileError),

    #[error("Network error: {0}")]
    Network(#[from] network::NetworkError),

    #[error("Upload failed: {0}")]
    Upload(#[from] transfer::UploadError),

    #[error("Download failed: {0}")]
    Download(#[from] transfer::DownloadError),

    #[error("Downloaded {} does not match {}", .output_path.display(), .source_path.display())]
    Mismatch {
        source_path: PathBuf,
        output_path: PathBuf,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RoundtripError>;
