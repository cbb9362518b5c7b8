//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

use storage_roundtrip::config::PrivateKey;
use storage_roundtrip::files::{fragment_reader, ContentHash, FragmentPlan};
use storage_roundtrip::network::{
    DownloadRequest, NetworkError, NodeSelection, RootId, StorageNetwork, StorageNode,
    StorageSession, TxId, UploadReceipt, UploadRequest,
};
use storage_roundtrip::NetworkConfig;

pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Config pointing at a local network laid out in `dir`
pub fn local_config(dir: &Path) -> NetworkConfig {
    NetworkConfig {
        evm_rpc: Url::from_file_path(dir.join("ledger.jsonl")).unwrap(),
        indexer_rpc: Url::from_directory_path(dir).unwrap(),
        private_key: PrivateKey::from_hex(TEST_KEY).unwrap(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> NetworkError {
    NetworkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// In-memory network that refuses the fragment at `fail_at`
#[derive(Clone, Default)]
pub struct FlakyNetwork {
    pub fail_at: Option<usize>,
    fragments: Arc<Mutex<HashMap<RootId, Vec<u8>>>>,
    submissions: Arc<Mutex<u64>>,
}

impl FlakyNetwork {
    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    pub fn stored(&self) -> usize {
        self.fragments.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageNetwork for FlakyNetwork {
    async fn connect(&self, _config: &NetworkConfig) -> Result<Box<dyn StorageSession>, NetworkError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl StorageSession for FlakyNetwork {
    async fn select_nodes(&self, selection: &NodeSelection) -> Result<Vec<StorageNode>, NetworkError> {
        Ok((0..selection.replicas)
            .map(|i| StorageNode {
                id: format!("mem-{i}"),
                location: "memory".into(),
                stored_fragments: 0,
            })
            .collect())
    }

    async fn split_upload(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, NetworkError> {
        let plan = FragmentPlan::new(request.file_size, request.fragment_size)
            .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;

        let mut receipt = UploadReceipt::new();
        for fragment in plan.fragments() {
            if Some(fragment.index) == self.fail_at {
                return Err(NetworkError::Submission {
                    index: fragment.index,
                    committed: receipt,
                    reason: "node rejected the segment".into(),
                });
            }

            let mut data = Vec::with_capacity(fragment.length as usize);
            fragment_reader(&mut *request.file, &fragment)
                .await
                .map_err(|source| io_error(Path::new("memory"), source))?
                .read_to_end(&mut data)
                .await
                .map_err(|source| io_error(Path::new("memory"), source))?;
            let root = RootId::new(ContentHash::hash(&data).to_hex());

            let sequence = {
                let mut submissions = self.submissions.lock().unwrap();
                *submissions += 1;
                *submissions
            };
            self.fragments.lock().unwrap().insert(root.clone(), data);
            receipt.push(TxId::new(format!("0xtx{sequence:04}")), root);
        }
        Ok(receipt)
    }

    async fn download_fragments(&self, request: DownloadRequest<'_>) -> Result<(), NetworkError> {
        let mut out = tokio::fs::File::create(request.out_path)
            .await
            .map_err(|source| io_error(request.out_path, source))?;

        for root in request.roots {
            let data = self
                .fragments
                .lock()
                .unwrap()
                .get(root)
                .cloned()
                .ok_or_else(|| NetworkError::FragmentNotFound(root.clone()))?;
            out.write_all(&data)
                .await
                .map_err(|source| io_error(request.out_path, source))?;
        }
        out.flush()
            .await
            .map_err(|source| io_error(request.out_path, source))
    }
}
