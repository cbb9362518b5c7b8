//! Network Module - The storage-network collaborator seam
//!
//! Node selection, ledger submission and content addressing belong to the
//! storage network. This module describes what the orchestrators need from
//! it ([`StorageNetwork`], [`StorageSession`]) and the values that cross the
//! boundary. [`LocalNetwork`] is a directory-backed network for offline runs.

mod ledger;
mod local;
mod types;

pub use ledger::{Ledger, LedgerRecord};
pub use local::{LocalNetwork, LocalSession};
pub use types::{
    DownloadProgress, DownloadStage, NodeSelection, RootId, SelectMethod, StorageNode, TxId,
    UploadProgress, UploadReceipt, UploadStage,
};

use crate::config::NetworkConfig;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Node selection failed: {0}")]
    NodeSelection(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Fragment {index} submission failed after {} committed: {reason}", .committed.len())]
    Submission {
        index: usize,
        committed: UploadReceipt,
        reason: String,
    },

    #[error("Fragment not found: {0}")]
    FragmentNotFound(RootId),

    #[error("Fragment failed verification: {0}")]
    Verification(RootId),

    /// A node holds the fragment but its bytes could not be read
    #[error("Cannot read fragment {root}: {source}")]
    FragmentRead {
        root: RootId,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NetworkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type UploadProgressTx = mpsc::UnboundedSender<UploadProgress>;
pub type DownloadProgressTx = mpsc::UnboundedSender<DownloadProgress>;

/// Fragment-splitting upload of an opened file to selected nodes
pub struct UploadRequest<'a> {
    /// Nodes returned by [`StorageSession::select_nodes`]
    pub nodes: &'a [StorageNode],

    /// Source file, read fragment by fragment
    pub file: &'a mut tokio::fs::File,

    /// Length of `file` in bytes
    pub file_size: u64,

    /// Upper bound on each fragment
    pub fragment_size: u64,

    pub progress: Option<&'a UploadProgressTx>,
}

/// Reconstruction of content from ordered roots into a local file
pub struct DownloadRequest<'a> {
    /// Roots exactly as returned by the matching upload
    pub roots: &'a [RootId],

    /// Destination, created or truncated
    pub out_path: &'a Path,

    /// Check each fragment against its root before writing it
    pub verify: bool,

    pub progress: Option<&'a DownloadProgressTx>,
}

/// Entry point to a storage network
#[async_trait]
pub trait StorageNetwork: Send + Sync {
    /// Open a session against the indexer, bound to the ledger signer
    async fn connect(&self, config: &NetworkConfig) -> Result<Box<dyn StorageSession>, NetworkError>;
}

/// One connected session. Dropping it closes the session.
#[async_trait]
pub trait StorageSession: Send + Sync {
    /// Choose serving nodes for an upload
    async fn select_nodes(&self, selection: &NodeSelection) -> Result<Vec<StorageNode>, NetworkError>;

    /// Submit fragments in offset order, one tx id and root id per fragment.
    ///
    /// On a failure at fragment K the error carries the K committed entries.
    async fn split_upload(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, NetworkError>;

    /// Fetch fragments by root, in order, concatenating them into the output
    async fn download_fragments(&self, request: DownloadRequest<'_>) -> Result<(), NetworkError>;
}
