//! Local storage network
//!
//! A directory stands in for the network: every subdirectory of `nodes/` is
//! a storage node holding fragments under `fragments/<root>`, and the ledger
//! is a JSON lines file. `indRpc` and `evmRpc` name these as `file://` URLs.
//! Roots are BLAKE3 hashes of fragment content, so identical fragments share
//! a root while every submission still gets its own transaction id.

use super::{
    DownloadProgress, DownloadRequest, DownloadStage, Ledger, NetworkError, NodeSelection, RootId,
    SelectMethod, StorageNetwork, StorageNode, StorageSession, TxId, UploadProgress,
    UploadReceipt, UploadRequest, UploadStage,
};
use crate::config::NetworkConfig;
use crate::files::{digest_reader, fragment_reader, ContentHash, FragmentPlan};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use url::Url;
use uuid::Uuid;

const NODES_DIR: &str = "nodes";
const FRAGMENTS_DIR: &str = "fragments";
const STREAM_CHUNK_SIZE: usize = 1024 * 1024;

/// Directory-backed storage network
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork;

impl LocalNetwork {
    pub fn new() -> Self {
        Self
    }

    /// Lay out a network directory with `node_count` empty nodes
    pub async fn init(dir: impl AsRef<Path>, node_count: usize) -> Result<Vec<PathBuf>, NetworkError> {
        let nodes_dir = dir.as_ref().join(NODES_DIR);
        let mut created = Vec::with_capacity(node_count);

        for i in 0..node_count {
            let node_dir = nodes_dir.join(format!("node-{:02}", i));
            let fragments_dir = node_dir.join(FRAGMENTS_DIR);
            tokio::fs::create_dir_all(&fragments_dir)
                .await
                .map_err(|e| NetworkError::io(&fragments_dir, e))?;
            created.push(node_dir);
        }

        tracing::info!("Initialized local network at {} with {} nodes", dir.as_ref().display(), node_count);
        Ok(created)
    }
}

fn file_url_path(name: &str, url: &Url) -> Result<PathBuf, NetworkError> {
    if url.scheme() != "file" {
        return Err(NetworkError::Connection(format!(
            "{name} {url} is not reachable by the local network (expected a file:// URL)"
        )));
    }

    url.to_file_path()
        .map_err(|_| NetworkError::Connection(format!("{name} {url} has no usable file path")))
}

#[async_trait]
impl StorageNetwork for LocalNetwork {
    async fn connect(&self, config: &NetworkConfig) -> Result<Box<dyn StorageSession>, NetworkError> {
        let network_dir = file_url_path("indexer", &config.indexer_rpc)?;
        let nodes_dir = network_dir.join(NODES_DIR);

        let is_dir = tokio::fs::metadata(&nodes_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(NetworkError::Connection(format!(
                "no storage network at {}",
                network_dir.display()
            )));
        }

        let ledger_path = file_url_path("ledger", &config.evm_rpc)?;
        let ledger = Ledger::open(&ledger_path)
            .await
            .map_err(|e| NetworkError::Connection(e.to_string()))?;

        let signer = config.private_key.signer_id();
        tracing::debug!(
            "Connected to local network {} as {} (ledger {})",
            network_dir.display(),
            signer,
            ledger_path.display()
        );

        Ok(Box::new(LocalSession {
            nodes_dir,
            ledger,
            signer,
        }))
    }
}

/// A session against a local network directory
pub struct LocalSession {
    nodes_dir: PathBuf,
    ledger: Ledger,
    signer: String,
}

impl LocalSession {
    /// All nodes currently in the network, sorted by id
    async fn list_nodes(&self) -> Result<Vec<StorageNode>, NetworkError> {
        let mut entries = tokio::fs::read_dir(&self.nodes_dir)
            .await
            .map_err(|e| NetworkError::Connection(format!("{}: {}", self.nodes_dir.display(), e)))?;

        let mut nodes = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| NetworkError::Connection(format!("{}: {}", self.nodes_dir.display(), e)))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let path = entry.path();

            let fragments_dir = path.join(FRAGMENTS_DIR);
            let stored_fragments = count_entries(&fragments_dir).await;
            nodes.push(StorageNode {
                id: entry.file_name().to_string_lossy().into_owned(),
                location: path.to_string_lossy().into_owned(),
                stored_fragments,
            });
        }

        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    /// Find a fragment on any node
    async fn locate(&self, root: &ContentHash) -> Result<Option<PathBuf>, NetworkError> {
        let name = root.to_hex();
        for node in self.list_nodes().await? {
            let candidate = Path::new(&node.location).join(FRAGMENTS_DIR).join(&name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// One fragment being written to a node under a temporary name
struct StagedFragment {
    node_id: String,
    fragments_dir: PathBuf,
    temp_path: PathBuf,
    file: tokio::fs::File,
}

impl StagedFragment {
    async fn create(node: &StorageNode) -> Result<Self, NetworkError> {
        let fragments_dir = Path::new(&node.location).join(FRAGMENTS_DIR);
        tokio::fs::create_dir_all(&fragments_dir)
            .await
            .map_err(|e| NetworkError::io(&fragments_dir, e))?;

        let temp_path = fragments_dir.join(format!(".{}.part", Uuid::new_v4()));
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| NetworkError::io(&temp_path, e))?;

        Ok(Self {
            node_id: node.id.clone(),
            fragments_dir,
            temp_path,
            file,
        })
    }

    /// Publish under `root`. A copy already stored there is kept as is.
    async fn commit(mut self, root: &RootId) -> Result<(), NetworkError> {
        self.file
            .flush()
            .await
            .map_err(|e| NetworkError::io(&self.temp_path, e))?;
        drop(self.file);

        let final_path = self.fragments_dir.join(root.as_str());
        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Ok(());
        }

        // Readers never see a partial fragment under its root
        if let Err(e) = tokio::fs::rename(&self.temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Err(NetworkError::io(&final_path, e));
        }
        Ok(())
    }

    async fn discard(self) {
        drop(self.file);
        let _ = tokio::fs::remove_file(&self.temp_path).await;
    }
}

async fn discard_all(staged: impl IntoIterator<Item = StagedFragment>) {
    for part in staged {
        part.discard().await;
    }
}

/// Copy `length` bytes from `source` into every staged file, hashing as they pass
async fn stream_fragment<R>(source: &mut R, staged: &mut [StagedFragment], length: u64) -> Result<RootId, String>
where
    R: AsyncRead + Unpin + Send,
{
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; STREAM_CHUNK_SIZE.min(length as usize).max(1)];
    let mut copied = 0u64;

    loop {
        let n = source
            .read(&mut buffer)
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        for part in staged.iter_mut() {
            part.file
                .write_all(&buffer[..n])
                .await
                .map_err(|e| format!("node {}: {}", part.node_id, e))?;
        }
        copied += n as u64;
    }

    if copied != length {
        return Err(format!("read failed: expected {length} bytes, source ended after {copied}"));
    }
    Ok(RootId::new(ContentHash::from(hasher.finalize()).to_hex()))
}

/// Stream one fragment to every node and return its root
async fn store_fragment<R>(nodes: &[StorageNode], source: &mut R, length: u64) -> Result<RootId, String>
where
    R: AsyncRead + Unpin + Send,
{
    let mut staged = Vec::with_capacity(nodes.len());
    for node in nodes {
        match StagedFragment::create(node).await {
            Ok(part) => staged.push(part),
            Err(e) => {
                discard_all(staged).await;
                return Err(format!("node {}: {}", node.id, e));
            }
        }
    }

    let root = match stream_fragment(source, &mut staged, length).await {
        Ok(root) => root,
        Err(reason) => {
            discard_all(staged).await;
            return Err(reason);
        }
    };

    let mut parts = staged.into_iter();
    while let Some(part) = parts.next() {
        let node_id = part.node_id.clone();
        if let Err(e) = part.commit(&root).await {
            discard_all(parts).await;
            return Err(format!("node {node_id}: {e}"));
        }
    }
    Ok(root)
}

/// Append one stored fragment to `out`
async fn copy_fragment(
    root: &RootId,
    path: &Path,
    out: &mut tokio::fs::File,
    out_path: &Path,
) -> Result<u64, NetworkError> {
    let read_error = |source: std::io::Error| NetworkError::FragmentRead {
        root: root.clone(),
        source,
    };

    let mut fragment = tokio::fs::File::open(path).await.map_err(read_error)?;
    let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let n = fragment.read(&mut buffer).await.map_err(read_error)?;
        if n == 0 {
            return Ok(copied);
        }
        out.write_all(&buffer[..n])
            .await
            .map_err(|e| NetworkError::io(out_path, e))?;
        copied += n as u64;
    }
}

async fn count_entries(dir: &Path) -> u64 {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with('.') {
            count += 1;
        }
    }
    count
}

#[async_trait]
impl StorageSession for LocalSession {
    async fn select_nodes(&self, selection: &NodeSelection) -> Result<Vec<StorageNode>, NetworkError> {
        if selection.replicas == 0 {
            return Err(NetworkError::NodeSelection("at least one replica is required".into()));
        }

        let mut candidates: Vec<StorageNode> = self
            .list_nodes()
            .await?
            .into_iter()
            .filter(|n| !selection.excluded.contains(&n.id))
            .collect();

        if candidates.len() < selection.replicas {
            return Err(NetworkError::NodeSelection(format!(
                "need {} nodes, {} available",
                selection.replicas,
                candidates.len()
            )));
        }

        match selection.method {
            // list_nodes is id-sorted and the sort is stable, so ties keep id order
            SelectMethod::Max => candidates.sort_by_key(|n| n.stored_fragments),
            SelectMethod::Random => candidates.shuffle(&mut rand::thread_rng()),
        }
        candidates.truncate(selection.replicas);

        tracing::debug!(
            "Selected nodes: {:?}",
            candidates.iter().map(|n| n.id.as_str()).collect::<Vec<_>>()
        );
        Ok(candidates)
    }

    async fn split_upload(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, NetworkError> {
        let UploadRequest {
            nodes,
            file,
            file_size,
            fragment_size,
            progress,
        } = request;

        if nodes.is_empty() {
            return Err(NetworkError::InvalidRequest("no nodes selected".into()));
        }

        let plan = FragmentPlan::new(file_size, fragment_size)
            .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
        let total = plan.len();

        let report = |receipt: &UploadReceipt, uploaded_bytes: u64, stage: UploadStage| {
            if let Some(tx) = progress {
                let _ = tx.send(UploadProgress {
                    fragments_total: total,
                    fragments_uploaded: receipt.len(),
                    total_bytes: file_size,
                    uploaded_bytes,
                    stage,
                });
            }
        };

        let mut receipt = UploadReceipt::new();
        let mut uploaded_bytes = 0u64;

        for fragment in plan.fragments() {
            let submitted = async {
                let mut source = fragment_reader(&mut *file, &fragment)
                    .await
                    .map_err(|e| format!("read failed: {e}"))?;
                let root = store_fragment(nodes, &mut source, fragment.length).await?;

                let record = self
                    .ledger
                    .submit(&self.signer, &root, fragment.index, fragment.length)
                    .await
                    .map_err(|e| e.to_string())?;

                Ok::<(TxId, RootId), String>((record.tx_id, root))
            }
            .await;

            match submitted {
                Ok((tx_id, root)) => {
                    tracing::debug!("Fragment {}/{}: tx {} root {}", fragment.index + 1, total, tx_id, root);
                    receipt.push(tx_id, root);
                    uploaded_bytes += fragment.length;
                    report(&receipt, uploaded_bytes, UploadStage::Submitting);
                }
                Err(reason) => {
                    report(&receipt, uploaded_bytes, UploadStage::Failed);
                    return Err(NetworkError::Submission {
                        index: fragment.index,
                        committed: receipt,
                        reason,
                    });
                }
            }
        }

        report(&receipt, uploaded_bytes, UploadStage::Complete);
        Ok(receipt)
    }

    async fn download_fragments(&self, request: DownloadRequest<'_>) -> Result<(), NetworkError> {
        let total = request.roots.len();
        let report = |done: usize, downloaded_bytes: u64, stage: DownloadStage| {
            if let Some(tx) = request.progress {
                let _ = tx.send(DownloadProgress {
                    fragments_total: total,
                    fragments_downloaded: done,
                    downloaded_bytes,
                    stage,
                });
            }
        };

        report(0, 0, DownloadStage::Locating);
        let mut sources = Vec::with_capacity(total);
        for root in request.roots {
            // Anything that does not parse as a hash cannot name a stored fragment
            let hash = ContentHash::from_hex(root.as_str())
                .map_err(|_| NetworkError::FragmentNotFound(root.clone()))?;
            match self.locate(&hash).await? {
                Some(path) => sources.push((root, hash, path)),
                None => {
                    report(0, 0, DownloadStage::Failed);
                    return Err(NetworkError::FragmentNotFound(root.clone()));
                }
            }
        }

        let mut out = tokio::fs::File::create(request.out_path)
            .await
            .map_err(|e| NetworkError::io(request.out_path, e))?;

        let mut downloaded_bytes = 0u64;
        for (done, (root, hash, path)) in sources.into_iter().enumerate() {
            // Checked before any of its bytes reach the output
            if request.verify {
                let digest = async {
                    let mut stored = tokio::fs::File::open(&path).await?;
                    digest_reader(&mut stored, STREAM_CHUNK_SIZE).await
                }
                .await
                .map_err(|source| NetworkError::FragmentRead {
                    root: root.clone(),
                    source,
                })?;

                if digest.hash != hash {
                    report(done, downloaded_bytes, DownloadStage::Failed);
                    return Err(NetworkError::Verification(root.clone()));
                }
            }

            downloaded_bytes += copy_fragment(root, &path, &mut out, request.out_path).await?;
            report(done + 1, downloaded_bytes, DownloadStage::Downloading);
        }

        out.flush()
            .await
            .map_err(|e| NetworkError::io(request.out_path, e))?;

        report(total, downloaded_bytes, DownloadStage::Complete);
        Ok(())
    }
}
