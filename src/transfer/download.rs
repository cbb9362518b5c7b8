//! Download orchestration: connect, fetch fragments by root, write output

use super::DownloadError;
use crate::config::NetworkConfig;
use crate::network::{DownloadProgressTx, DownloadRequest, NetworkError, RootId, StorageNetwork};

use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    /// Re-check every fragment against its root. Off means unverified data is accepted.
    pub verify: bool,
}

pub struct DownloadOrchestrator {
    network: Arc<dyn StorageNetwork>,
    config: NetworkConfig,
    options: DownloadOptions,
    progress_tx: Option<DownloadProgressTx>,
}

impl DownloadOrchestrator {
    pub fn new(network: Arc<dyn StorageNetwork>, config: NetworkConfig) -> Self {
        Self {
            network,
            config,
            options: DownloadOptions::default(),
            progress_tx: None,
        }
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    /// Set download progress channel
    pub fn with_progress(mut self, tx: DownloadProgressTx) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Rebuild content from `roots` (in upload order) into `out_path`.
    ///
    /// `out_path` is created or truncated. If a fragment is missing or fails
    /// verification, whatever was written before it stays on disk.
    pub async fn download(&self, roots: &[RootId], out_path: impl AsRef<Path>) -> Result<(), DownloadError> {
        let out_path = out_path.as_ref();
        if roots.is_empty() {
            return Err(DownloadError::NoRoots);
        }

        tracing::info!(
            "Downloading {} fragments into {} (verify: {})",
            roots.len(),
            out_path.display(),
            self.options.verify
        );

        let session = self
            .network
            .connect(&self.config)
            .await
            .map_err(DownloadError::Connection)?;

        session
            .download_fragments(DownloadRequest {
                roots,
                out_path,
                verify: self.options.verify,
                progress: self.progress_tx.as_ref(),
            })
            .await
            .map_err(|e| match e {
                NetworkError::FragmentNotFound(root) => DownloadError::FragmentNotFound(root),
                NetworkError::Verification(root) => DownloadError::Verification(root),
                NetworkError::FragmentRead { root, source } => DownloadError::FragmentRead { root, source },
                NetworkError::Io { path, source } if path.as_path() == out_path => {
                    DownloadError::Write { path, source }
                }
                other => DownloadError::Connection(other),
            })?;

        tracing::info!("Download into {} complete", out_path.display());
        Ok(())
    }
}
