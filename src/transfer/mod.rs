//! Transfer Module - Upload and download orchestration
//!
//! Each call opens its own session with the storage network and drops it
//! before returning. Nothing here retries or rolls back.

mod download;
mod upload;

pub use download::{DownloadOptions, DownloadOrchestrator};
pub use upload::{UploadOptions, UploadOrchestrator};

use crate::network::{NetworkError, RootId, UploadReceipt};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid fragment size: must be greater than zero")]
    InvalidFragmentSize,

    #[error(transparent)]
    Connection(NetworkError),

    #[error(transparent)]
    NodeSelection(NetworkError),

    #[error("Cannot read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Split upload failed at fragment {index} of {total} ({} committed): {reason}", .committed.len())]
    SplitUpload {
        index: usize,
        total: usize,
        /// Entries already committed to the network; these are not rolled back
        committed: UploadReceipt,
        reason: String,
    },
}

impl UploadError {
    /// Fragments committed before the failure
    pub fn committed(&self) -> Option<&UploadReceipt> {
        match self {
            Self::SplitUpload { committed, .. } => Some(committed),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("No root ids to download")]
    NoRoots,

    #[error(transparent)]
    Connection(NetworkError),

    #[error("Fragment not found: {0}")]
    FragmentNotFound(RootId),

    #[error("Fragment failed verification: {0}")]
    Verification(RootId),

    #[error("Cannot read fragment {root}: {source}")]
    FragmentRead {
        root: RootId,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
