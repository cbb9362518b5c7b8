//! Driver - one preallocate -> upload -> download pass
//!
//! Stages run strictly in order. What happens after a failed stage is an
//! explicit per-stage policy: halt (default) or log and carry on with
//! whatever the failed stage left behind.

use crate::config::{NetworkConfig, RunConfig};
use crate::files::{create_sized_file, digest_reader, FileDigest};
use crate::network::{DownloadProgressTx, StorageNetwork, UploadProgressTx, UploadReceipt};
use crate::transfer::{DownloadOptions, DownloadOrchestrator, UploadOptions, UploadOrchestrator};
use crate::{RoundtripError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

const COMPARE_CHUNK_SIZE: usize = 1024 * 1024;

/// What the driver does when a stage fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagePolicy {
    /// Stop the run and return the error
    #[default]
    Halt,

    /// Log, record in the report, and run the next stage anyway
    Continue,
}

impl FromStr for StagePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "halt" => Ok(Self::Halt),
            "continue" => Ok(Self::Continue),
            other => Err(format!("unknown stage policy: {other} (expected halt or continue)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicies {
    pub create: StagePolicy,
    pub upload: StagePolicy,
    pub download: StagePolicy,
}

impl StagePolicies {
    /// The same policy for every stage
    pub fn all(policy: StagePolicy) -> Self {
        Self {
            create: policy,
            upload: policy,
            download: policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Create,
    Upload,
    Download,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Upload => f.write_str("upload"),
            Self::Download => f.write_str("download"),
        }
    }
}

/// A stage that failed under the `Continue` policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: String,
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub source_path: PathBuf,
    pub output_path: PathBuf,

    /// Ids committed by the upload (partial if the upload failed and the run continued)
    pub receipt: UploadReceipt,

    /// Whether the download stage completed
    pub downloaded: bool,

    /// Byte equality of output and source, when both could be read
    pub matches: Option<bool>,

    /// Failures that were logged and passed over
    pub failures: Vec<StageFailure>,
}

impl RunReport {
    /// Every stage succeeded and the output equals the source
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.downloaded && self.matches == Some(true)
    }
}

pub struct Driver {
    network: Arc<dyn StorageNetwork>,
    network_config: NetworkConfig,
    run: RunConfig,
    upload_progress_tx: Option<UploadProgressTx>,
    download_progress_tx: Option<DownloadProgressTx>,
}

impl Driver {
    pub fn new(network: Arc<dyn StorageNetwork>, network_config: NetworkConfig, run: RunConfig) -> Self {
        Self {
            network,
            network_config,
            run,
            upload_progress_tx: None,
            download_progress_tx: None,
        }
    }

    /// Set upload progress channel
    pub fn with_upload_progress(mut self, tx: UploadProgressTx) -> Self {
        self.upload_progress_tx = Some(tx);
        self
    }

    /// Set download progress channel
    pub fn with_download_progress(mut self, tx: DownloadProgressTx) -> Self {
        self.download_progress_tx = Some(tx);
        self
    }

    /// Run all three stages
    pub async fn run(&self) -> Result<RunReport> {
        self.run.validate()?;

        let mut report = RunReport {
            source_path: self.run.source_path.clone(),
            output_path: self.run.output_path.clone(),
            receipt: UploadReceipt::new(),
            downloaded: false,
            matches: None,
            failures: vec![],
        };

        // 1. Placeholder file
        match create_sized_file(&self.run.source_path, self.run.file_size).await {
            Ok(()) => tracing::info!(
                "Created {} ({} bytes)",
                self.run.source_path.display(),
                self.run.file_size
            ),
            Err(e) => self.fail(&mut report, Stage::Create, self.run.policies.create, e.into())?,
        }

        // 2. Upload
        let mut uploader = UploadOrchestrator::new(self.network.clone(), self.network_config.clone())
            .with_options(UploadOptions {
                replicas: self.run.replicas,
                method: self.run.method,
                excluded_nodes: vec![],
            });
        if let Some(tx) = &self.upload_progress_tx {
            uploader = uploader.with_progress(tx.clone());
        }

        match uploader.upload(&self.run.source_path, self.run.fragment_size).await {
            Ok(receipt) => {
                tracing::info!("Uploaded {} fragments", receipt.len());
                for (i, (tx_id, root_id)) in receipt.entries().enumerate() {
                    tracing::info!("  [{}] tx {} root {}", i, tx_id, root_id);
                }
                report.receipt = receipt;
            }
            Err(e) => {
                if let Some(committed) = e.committed() {
                    report.receipt = committed.clone();
                }
                self.fail(&mut report, Stage::Upload, self.run.policies.upload, e.into())?;
            }
        }

        // 3. Download
        let mut downloader = DownloadOrchestrator::new(self.network.clone(), self.network_config.clone())
            .with_options(DownloadOptions {
                verify: self.run.verify,
            });
        if let Some(tx) = &self.download_progress_tx {
            downloader = downloader.with_progress(tx.clone());
        }

        match downloader
            .download(report.receipt.root_ids(), &self.run.output_path)
            .await
        {
            Ok(()) => {
                report.downloaded = true;
                tracing::info!("Downloaded into {}", self.run.output_path.display());
            }
            Err(e) => self.fail(&mut report, Stage::Download, self.run.policies.download, e.into())?,
        }

        // 4. Compare output with source
        if report.downloaded {
            let matches = files_match(&self.run.source_path, &self.run.output_path).await?;
            report.matches = Some(matches);

            if !matches {
                let err = RoundtripError::Mismatch {
                    source_path: self.run.source_path.clone(),
                    output_path: self.run.output_path.clone(),
                };
                self.fail(&mut report, Stage::Download, self.run.policies.download, err)?;
            } else {
                tracing::info!("Round trip verified: output matches source");
            }
        }

        Ok(report)
    }

    /// Apply a stage policy to a failure
    fn fail(
        &self,
        report: &mut RunReport,
        stage: Stage,
        policy: StagePolicy,
        err: RoundtripError,
    ) -> Result<()> {
        match policy {
            StagePolicy::Halt => {
                tracing::error!("{} stage failed: {}", stage, err);
                Err(err)
            }
            StagePolicy::Continue => {
                tracing::warn!("{} stage failed, continuing: {}", stage, err);
                report.failures.push(StageFailure {
                    stage,
                    error: err.to_string(),
                });
                Ok(())
            }
        }
    }
}

async fn file_digest(path: &Path) -> std::io::Result<FileDigest> {
    let mut file = tokio::fs::File::open(path).await?;
    digest_reader(&mut file, COMPARE_CHUNK_SIZE).await
}

/// Compare two files by length and BLAKE3 digest
pub async fn files_match(a: &Path, b: &Path) -> Result<bool> {
    Ok(file_digest(a).await? == file_digest(b).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivateKey;
    use crate::network::LocalNetwork;
    use tempfile::TempDir;
    use url::Url;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn config_for(dir: &Path) -> NetworkConfig {
        NetworkConfig {
            evm_rpc: Url::from_file_path(dir.join("ledger.jsonl")).unwrap(),
            indexer_rpc: Url::from_directory_path(dir).unwrap(),
            private_key: PrivateKey::from_hex(KEY).unwrap(),
        }
    }

    fn run_config(dir: &Path, file_size: u64, fragment_size: u64) -> RunConfig {
        RunConfig {
            source_path: dir.join("testfile"),
            output_path: dir.join("testfile_down"),
            file_size,
            fragment_size,
            verify: true,
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn test_full_run() {
        let temp_dir = TempDir::new().unwrap();
        LocalNetwork::init(temp_dir.path(), 2).await.unwrap();

        let driver = Driver::new(
            Arc::new(LocalNetwork::new()),
            config_for(temp_dir.path()),
            run_config(temp_dir.path(), 100_000, 30_000),
        );
        let report = driver.run().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.receipt.len(), 4);
        assert_eq!(
            tokio::fs::metadata(&report.output_path).await.unwrap().len(),
            100_000
        );
    }

    #[tokio::test]
    async fn test_halt_on_upload_failure() {
        let temp_dir = TempDir::new().unwrap();
        // No network initialized: upload cannot connect

        let driver = Driver::new(
            Arc::new(LocalNetwork::new()),
            config_for(temp_dir.path()),
            run_config(temp_dir.path(), 1_000, 100),
        );
        let result = driver.run().await;

        assert!(matches!(result, Err(RoundtripError::Upload(_))));
        // Halted before the download stage touched the output
        assert!(!temp_dir.path().join("testfile_down").exists());
    }

    #[tokio::test]
    async fn test_continue_records_failures() {
        let temp_dir = TempDir::new().unwrap();

        let mut run = run_config(temp_dir.path(), 1_000, 100);
        run.policies = StagePolicies::all(StagePolicy::Continue);
        let driver = Driver::new(Arc::new(LocalNetwork::new()), config_for(temp_dir.path()), run);

        let report = driver.run().await.unwrap();

        let stages: Vec<Stage> = report.failures.iter().map(|f| f.stage).collect();
        assert_eq!(stages, vec![Stage::Upload, Stage::Download]);
        assert!(report.receipt.is_empty());
        assert!(!report.downloaded);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_invalid_run_config() {
        let temp_dir = TempDir::new().unwrap();
        let driver = Driver::new(
            Arc::new(LocalNetwork::new()),
            config_for(temp_dir.path()),
            run_config(temp_dir.path(), 0, 100),
        );

        assert!(matches!(driver.run().await, Err(RoundtripError::Config(_))));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("halt".parse::<StagePolicy>().unwrap(), StagePolicy::Halt);
        assert_eq!("CONTINUE".parse::<StagePolicy>().unwrap(), StagePolicy::Continue);
        assert!("retry".parse::<StagePolicy>().is_err());
        assert_eq!(StagePolicies::default(), StagePolicies::all(StagePolicy::Halt));
    }
}
