//! Files Module - Local payload handling
//!
//! Preallocates placeholder files, plans how a file splits into fragments,
//! and hashes file content for round-trip checks.

mod fragment;
mod hashing;
mod preallocate;

pub use fragment::{fragment_reader, Fragment, FragmentPlan};
pub use hashing::{digest_reader, ContentHash, FileDigest};
pub use preallocate::create_sized_file;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("Invalid file size {size}: a preallocated file needs at least one byte")]
    InvalidSize { size: u64 },

    #[error("Invalid fragment size: must be greater than zero")]
    InvalidFragmentSize,

    #[error("Fragment {index} is out of range for a plan of {total} fragments")]
    FragmentOutOfRange { index: usize, total: usize },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
