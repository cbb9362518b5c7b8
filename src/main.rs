//! storage-roundtrip CLI
//!
//! `run` creates a placeholder file, uploads it in fragments and downloads it
//! back. The stages are also available one at a time.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storage_roundtrip::config::{DEFAULT_FILE_SIZE, DEFAULT_FRAGMENT_SIZE};
use storage_roundtrip::files::create_sized_file;
use storage_roundtrip::network::{
    DownloadProgress, RootId, SelectMethod, StorageNetwork, UploadProgress, UploadReceipt,
};
use storage_roundtrip::transfer::{DownloadOptions, UploadOptions};
use storage_roundtrip::{
    DownloadOrchestrator, Driver, LocalNetwork, NetworkConfig, RunConfig, StagePolicies,
    StagePolicy, UploadOrchestrator,
};

#[derive(Parser)]
#[command(name = "storage-roundtrip", version, about = "Fragment upload/download round trip through a storage network")]
struct Cli {
    /// Env file to load before reading evmRpc, indRpc and privateKey (default: ./.env)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create, upload and download a placeholder file
    Run(RunArgs),
    /// Create a placeholder file of an exact size
    Create {
        #[arg(long, default_value = "4gtestfile")]
        file: PathBuf,
        #[arg(long, value_parser = parse_size, default_value_t = DEFAULT_FILE_SIZE)]
        size: u64,
    },
    /// Upload a file in fragments and print its ids
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_parser = parse_size, default_value_t = DEFAULT_FRAGMENT_SIZE)]
        fragment_size: u64,
        #[command(flatten)]
        selection: SelectionArgs,
        /// Write the receipt (tx and root ids) as JSON
        #[arg(long)]
        receipt: Option<PathBuf>,
    },
    /// Download content by root ids
    Download {
        /// Receipt written by `upload`
        #[arg(long, conflicts_with = "roots", required_unless_present = "roots")]
        receipt: Option<PathBuf>,
        /// Comma-separated root ids, in upload order
        #[arg(long, value_delimiter = ',')]
        roots: Vec<String>,
        #[arg(long)]
        out: PathBuf,
        /// Verify fragments against their roots
        #[arg(long)]
        verify: bool,
    },
    /// Lay out a local network directory
    InitNetwork {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = 3)]
        nodes: usize,
    },
}

#[derive(Args)]
struct SelectionArgs {
    /// Nodes to replicate each fragment to
    #[arg(long, default_value_t = 1)]
    replicas: usize,
    /// Node selection method: max or random
    #[arg(long, default_value_t = SelectMethod::Max)]
    method: SelectMethod,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = "4gtestfile")]
    file: PathBuf,
    #[arg(long, default_value = "4gtestfile_down")]
    out: PathBuf,
    #[arg(long, value_parser = parse_size, default_value_t = DEFAULT_FILE_SIZE)]
    size: u64,
    #[arg(long, value_parser = parse_size, default_value_t = DEFAULT_FRAGMENT_SIZE)]
    fragment_size: u64,
    #[command(flatten)]
    selection: SelectionArgs,
    /// Verify downloaded fragments against their roots
    #[arg(long)]
    verify: bool,
    /// Policy applied to every stage that fails: halt or continue
    #[arg(long, default_value = "halt")]
    on_error: StagePolicy,
    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Parse sizes like `4096`, `4MiB`, `400M`, `4GiB`
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size: {s}"))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size suffix: {other}")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size overflows: {s}"))
}

fn load_network_config(env_file: Option<&PathBuf>) -> Result<NetworkConfig> {
    let config = match env_file {
        Some(path) => NetworkConfig::from_env_file(path),
        None => NetworkConfig::from_env(),
    }
    .context("invalid network configuration")?;

    tracing::info!("Indexer: {}", config.indexer_rpc);
    tracing::info!("Ledger: {}", config.evm_rpc);
    tracing::info!("Signer: {}", config.private_key.signer_id());
    Ok(config)
}

/// Log upload progress until every sender is dropped
fn log_upload_progress() -> (mpsc::UnboundedSender<UploadProgress>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<UploadProgress>();
    let handle = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            tracing::info!(
                "Upload {:?}: {}/{} fragments, {}/{} bytes",
                p.stage,
                p.fragments_uploaded,
                p.fragments_total,
                p.uploaded_bytes,
                p.total_bytes
            );
        }
    });
    (tx, handle)
}

/// Log download progress until every sender is dropped
fn log_download_progress() -> (mpsc::UnboundedSender<DownloadProgress>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DownloadProgress>();
    let handle = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            tracing::info!(
                "Download {:?}: {}/{} fragments, {} bytes",
                p.stage,
                p.fragments_downloaded,
                p.fragments_total,
                p.downloaded_bytes
            );
        }
    });
    (tx, handle)
}

/// Wait for a progress logger to print what is still queued
async fn drain_progress_log(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::warn!("Progress logger stopped: {}", e);
    }
}

fn print_receipt(receipt: &UploadReceipt) {
    for (i, (tx_id, root_id)) in receipt.entries().enumerate() {
        println!("fragment {i}: tx {tx_id} root {root_id}");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage_roundtrip=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let network: Arc<dyn StorageNetwork> = Arc::new(LocalNetwork::new());

    match cli.command {
        Command::Run(args) => {
            let network_config = load_network_config(cli.env_file.as_ref())?;
            let run = RunConfig {
                source_path: args.file,
                output_path: args.out,
                file_size: args.size,
                fragment_size: args.fragment_size,
                replicas: args.selection.replicas,
                method: args.selection.method,
                verify: args.verify,
                policies: StagePolicies::all(args.on_error),
            };
            tracing::info!(
                "Run: {} bytes in {} fragments",
                run.file_size,
                run.expected_fragments()
            );

            let (upload_tx, upload_log) = log_upload_progress();
            let (download_tx, download_log) = log_download_progress();
            let driver = Driver::new(network, network_config, run)
                .with_upload_progress(upload_tx)
                .with_download_progress(download_tx);
            let result = driver.run().await;

            // Closing the channels lets the loggers finish
            drop(driver);
            drain_progress_log(upload_log).await;
            drain_progress_log(download_log).await;
            let report = result?;

            print_receipt(&report.receipt);
            if let Some(path) = args.report {
                let json = serde_json::to_string_pretty(&report)?;
                tokio::fs::write(&path, json)
                    .await
                    .with_context(|| format!("failed to write report to {}", path.display()))?;
            }

            if !report.is_success() {
                anyhow::bail!(
                    "run finished with {} failed stage(s)",
                    report.failures.len().max(1)
                );
            }
            println!("round trip complete: {}", report.output_path.display());
        }

        Command::Create { file, size } => {
            create_sized_file(&file, size).await?;
            println!("created {} ({} bytes)", file.display(), size);
        }

        Command::Upload {
            file,
            fragment_size,
            selection,
            receipt: receipt_path,
        } => {
            let network_config = load_network_config(cli.env_file.as_ref())?;
            let (progress_tx, progress_log) = log_upload_progress();
            let uploader = UploadOrchestrator::new(network, network_config)
                .with_options(UploadOptions {
                    replicas: selection.replicas,
                    method: selection.method,
                    excluded_nodes: vec![],
                })
                .with_progress(progress_tx);
            let result = uploader.upload(&file, fragment_size).await;

            drop(uploader);
            drain_progress_log(progress_log).await;
            let receipt = result?;

            print_receipt(&receipt);
            if let Some(path) = receipt_path {
                tokio::fs::write(&path, receipt.to_json()?)
                    .await
                    .with_context(|| format!("failed to write receipt to {}", path.display()))?;
                println!("receipt written to {}", path.display());
            }
        }

        Command::Download {
            receipt,
            roots,
            out,
            verify,
        } => {
            let network_config = load_network_config(cli.env_file.as_ref())?;
            let roots: Vec<RootId> = match receipt {
                Some(path) => {
                    let json = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("failed to read receipt {}", path.display()))?;
                    UploadReceipt::from_json(&json)
                        .with_context(|| format!("invalid receipt {}", path.display()))?
                        .into_parts()
                        .1
                }
                None => roots.into_iter().map(RootId::new).collect(),
            };

            let (progress_tx, progress_log) = log_download_progress();
            let downloader = DownloadOrchestrator::new(network, network_config)
                .with_options(DownloadOptions { verify })
                .with_progress(progress_tx);
            let result = downloader.download(&roots, &out).await;

            drop(downloader);
            drain_progress_log(progress_log).await;
            result?;
            println!("downloaded {} fragments into {}", roots.len(), out.display());
        }

        Command::InitNetwork { dir, nodes } => {
            let created = LocalNetwork::init(&dir, nodes).await?;
            for node in created {
                println!("{}", node.display());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("4MiB").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size("400m").unwrap(), 400 * 1024 * 1024);
        assert_eq!(parse_size("4 GiB").unwrap(), 4 * 1024 * 1024 * 1024);
        assert!(parse_size("MiB").is_err());
        assert!(parse_size("4XB").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::parse_from([
            "storage-roundtrip",
            "run",
            "--size",
            "40MiB",
            "--fragment-size",
            "4MiB",
            "--on-error",
            "continue",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.size, 40 * 1024 * 1024);
                assert_eq!(args.on_error, StagePolicy::Continue);
            }
            _ => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_progress_logs_finish_with_the_run() {
        use storage_roundtrip::config::PrivateKey;
        use url::Url;

        let temp_dir = tempfile::TempDir::new().unwrap();
        LocalNetwork::init(temp_dir.path(), 1).await.unwrap();
        let network_config = NetworkConfig {
            evm_rpc: Url::from_file_path(temp_dir.path().join("ledger.jsonl")).unwrap(),
            indexer_rpc: Url::from_directory_path(temp_dir.path()).unwrap(),
            private_key: PrivateKey::from_hex(
                "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            )
            .unwrap(),
        };
        let run = RunConfig {
            source_path: temp_dir.path().join("src"),
            output_path: temp_dir.path().join("dst"),
            file_size: 10_000,
            fragment_size: 4_000,
            ..RunConfig::default()
        };

        let (upload_tx, upload_log) = log_upload_progress();
        let (download_tx, download_log) = log_download_progress();
        let driver = Driver::new(Arc::new(LocalNetwork::new()), network_config, run)
            .with_upload_progress(upload_tx)
            .with_download_progress(download_tx);
        assert!(driver.run().await.unwrap().is_success());
        drop(driver);

        // Hangs if any sender outlived the driver
        let drained = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            drain_progress_log(upload_log).await;
            drain_progress_log(download_log).await;
        })
        .await;
        assert!(drained.is_ok());
    }
}
