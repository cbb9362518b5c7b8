//! Settings for one preallocate -> upload -> download pass

use super::ConfigError;
use crate::driver::StagePolicies;
use crate::network::SelectMethod;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// 4 GiB placeholder payload
pub const DEFAULT_FILE_SIZE: u64 = 4 * 1024 * MIB;

/// 400 MiB per fragment
pub const DEFAULT_FRAGMENT_SIZE: u64 = 400 * MIB;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Placeholder file to create and upload
    pub source_path: PathBuf,

    /// Destination of the reconstructed download
    pub output_path: PathBuf,

    /// Size of the placeholder file (bytes)
    pub file_size: u64,

    /// Upper bound on each fragment (bytes)
    pub fragment_size: u64,

    /// Storage nodes to select per upload
    pub replicas: usize,

    /// How the indexer ranks candidate nodes
    pub method: SelectMethod,

    /// Check downloaded fragments against their roots
    pub verify: bool,

    /// What the driver does when a stage fails
    pub policies: StagePolicies,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("4gtestfile"),
            output_path: PathBuf::from("4gtestfile_down"),
            file_size: DEFAULT_FILE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            replicas: 1,
            method: SelectMethod::Max,
            verify: false,
            policies: StagePolicies::default(),
        }
    }
}

impl RunConfig {
    /// Reject settings no stage could satisfy
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_size == 0 {
            return Err(ConfigError::InvalidRun("file size must be at least 1 byte".into()));
        }
        if self.fragment_size == 0 {
            return Err(ConfigError::InvalidRun("fragment size must be positive".into()));
        }
        if self.replicas == 0 {
            return Err(ConfigError::InvalidRun("at least one replica is required".into()));
        }
        if self.source_path == self.output_path {
            return Err(ConfigError::InvalidRun(format!(
                "source and output are the same path: {}",
                self.source_path.display()
            )));
        }
        Ok(())
    }

    /// Fragments an upload of the source file will produce
    pub fn expected_fragments(&self) -> u64 {
        self.file_size.div_ceil(self.fragment_size.max(1))
    }
}
