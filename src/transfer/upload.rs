//! Upload orchestration: open file, connect, select nodes, split-upload

use super::UploadError;
use crate::config::NetworkConfig;
use crate::files::FragmentPlan;
use crate::network::{
    NetworkError, NodeSelection, SelectMethod, StorageNetwork, UploadProgressTx, UploadReceipt,
    UploadRequest,
};

use std::path::Path;
use std::sync::Arc;

/// Node selection settings for uploads
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub replicas: usize,
    pub method: SelectMethod,
    pub excluded_nodes: Vec<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            replicas: 1,
            method: SelectMethod::Max,
            excluded_nodes: vec![],
        }
    }
}

pub struct UploadOrchestrator {
    network: Arc<dyn StorageNetwork>,
    config: NetworkConfig,
    options: UploadOptions,
    progress_tx: Option<UploadProgressTx>,
}

impl UploadOrchestrator {
    pub fn new(network: Arc<dyn StorageNetwork>, config: NetworkConfig) -> Self {
        Self {
            network,
            config,
            options: UploadOptions::default(),
            progress_tx: None,
        }
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// Set upload progress channel
    pub fn with_progress(mut self, tx: UploadProgressTx) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Upload `path` in fragments of at most `fragment_size` bytes.
    ///
    /// Returns one tx id and one root id per fragment, in offset order. Every
    /// call submits again; nothing is deduplicated against earlier uploads.
    pub async fn upload(
        &self,
        path: impl AsRef<Path>,
        fragment_size: u64,
    ) -> Result<UploadReceipt, UploadError> {
        let path = path.as_ref();
        if fragment_size == 0 {
            return Err(UploadError::InvalidFragmentSize);
        }

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|source| UploadError::File {
                path: path.to_path_buf(),
                source,
            })?;
        let file_size = file
            .metadata()
            .await
            .map_err(|source| UploadError::File {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let plan = FragmentPlan::new(file_size, fragment_size)
            .map_err(|_| UploadError::InvalidFragmentSize)?;
        let total = plan.len();

        tracing::info!(
            "Uploading {} ({} bytes) as {} fragments of up to {} bytes",
            path.display(),
            file_size,
            total,
            fragment_size
        );

        let session = self
            .network
            .connect(&self.config)
            .await
            .map_err(UploadError::Connection)?;

        let selection = NodeSelection {
            replicas: self.options.replicas,
            excluded: self.options.excluded_nodes.clone(),
            method: self.options.method,
        };
        let nodes = session
            .select_nodes(&selection)
            .await
            .map_err(UploadError::NodeSelection)?;
        tracing::info!(
            "Selected {} node(s): {}",
            nodes.len(),
            nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>().join(", ")
        );

        let receipt = session
            .split_upload(UploadRequest {
                nodes: &nodes,
                file: &mut file,
                file_size,
                fragment_size,
                progress: self.progress_tx.as_ref(),
            })
            .await
            .map_err(|e| match e {
                NetworkError::Submission {
                    index,
                    committed,
                    reason,
                } => UploadError::SplitUpload {
                    index,
                    total,
                    committed,
                    reason,
                },
                NetworkError::Io { path, source } => UploadError::File { path, source },
                other => UploadError::SplitUpload {
                    index: 0,
                    total,
                    committed: UploadReceipt::new(),
                    reason: other.to_string(),
                },
            })?;

        if receipt.len() != total {
            return Err(UploadError::SplitUpload {
                index: receipt.len().min(total),
                total,
                reason: format!("network returned {} entries for {} fragments", receipt.len(), total),
                committed: receipt,
            });
        }

        for (i, (tx_id, root_id)) in receipt.entries().enumerate() {
            tracing::debug!("Fragment {}: tx {} root {}", i, tx_id, root_id);
        }
        tracing::info!("Upload of {} complete: {} fragments", path.display(), receipt.len());

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivateKey;
    use crate::network::{LocalNetwork, UploadStage};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use url::Url;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn config_for(dir: &Path) -> NetworkConfig {
        NetworkConfig {
            evm_rpc: Url::from_file_path(dir.join("ledger.jsonl")).unwrap(),
            indexer_rpc: Url::from_directory_path(dir).unwrap(),
            private_key: PrivateKey::from_hex(KEY).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_fragment_counts() {
        let temp_dir = TempDir::new().unwrap();
        LocalNetwork::init(temp_dir.path(), 1).await.unwrap();
        let uploader = UploadOrchestrator::new(Arc::new(LocalNetwork::new()), config_for(temp_dir.path()));

        let path = temp_dir.path().join("payload");
        for (file_size, fragment_size) in [(1u64, 1u64), (100, 7), (100, 100), (100, 1000), (4096, 1024)] {
            let data: Vec<u8> = (0..file_size).map(|i| (i * 31 % 256) as u8).collect();
            tokio::fs::write(&path, &data).await.unwrap();

            let receipt = uploader.upload(&path, fragment_size).await.unwrap();

            let expected = file_size.div_ceil(fragment_size) as usize;
            assert_eq!(receipt.tx_ids().len(), expected);
            assert_eq!(receipt.root_ids().len(), expected);
        }
    }

    #[tokio::test]
    async fn test_invalid_fragment_size() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = UploadOrchestrator::new(Arc::new(LocalNetwork::new()), config_for(temp_dir.path()));

        let result = uploader.upload(temp_dir.path().join("whatever"), 0).await;
        assert!(matches!(result, Err(UploadError::InvalidFragmentSize)));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        LocalNetwork::init(temp_dir.path(), 1).await.unwrap();
        let uploader = UploadOrchestrator::new(Arc::new(LocalNetwork::new()), config_for(temp_dir.path()));

        let result = uploader.upload(temp_dir.path().join("missing"), 1024).await;
        assert!(matches!(result, Err(UploadError::File { .. })));
    }

    #[tokio::test]
    async fn test_no_network() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("payload");
        tokio::fs::write(&path, b"data").await.unwrap();
        let uploader = UploadOrchestrator::new(Arc::new(LocalNetwork::new()), config_for(temp_dir.path()));

        let result = uploader.upload(&path, 2).await;
        assert!(matches!(result, Err(UploadError::Connection(_))));
    }

    #[tokio::test]
    async fn test_not_enough_nodes() {
        let temp_dir = TempDir::new().unwrap();
        LocalNetwork::init(temp_dir.path(), 1).await.unwrap();
        let path = temp_dir.path().join("payload");
        tokio::fs::write(&path, b"data").await.unwrap();

        let uploader = UploadOrchestrator::new(Arc::new(LocalNetwork::new()), config_for(temp_dir.path()))
            .with_options(UploadOptions {
                replicas: 2,
                ..UploadOptions::default()
            });

        let result = uploader.upload(&path, 2).await;
        assert!(matches!(result, Err(UploadError::NodeSelection(_))));
    }

    #[tokio::test]
    async fn test_progress_reported() {
        let temp_dir = TempDir::new().unwrap();
        LocalNetwork::init(temp_dir.path(), 1).await.unwrap();
        let path = temp_dir.path().join("payload");
        tokio::fs::write(&path, vec![1u8; 1000]).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let uploader = UploadOrchestrator::new(Arc::new(LocalNetwork::new()), config_for(temp_dir.path()))
            .with_progress(tx);

        uploader.upload(&path, 300).await.unwrap();

        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 5); // 4 fragments + completion
        assert_eq!(events[3].fragments_uploaded, 4);
        assert_eq!(events[4].stage, UploadStage::Complete);
        assert_eq!(events[4].uploaded_bytes, 1000);
    }
}
