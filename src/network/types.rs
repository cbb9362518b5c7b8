//! Values exchanged with the storage network

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque reference to a ledger commitment made for one fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content address of one uploaded fragment, the download lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootId(String);

impl RootId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a fragment-splitting upload.
///
/// `tx_ids[i]` and `root_ids[i]` both describe fragment `i`; the two lists
/// always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ReceiptRecord")]
pub struct UploadReceipt {
    tx_ids: Vec<TxId>,
    root_ids: Vec<RootId>,
}

#[derive(Deserialize)]
struct ReceiptRecord {
    tx_ids: Vec<TxId>,
    root_ids: Vec<RootId>,
}

impl TryFrom<ReceiptRecord> for UploadReceipt {
    type Error = String;

    fn try_from(record: ReceiptRecord) -> Result<Self, Self::Error> {
        if record.tx_ids.len() != record.root_ids.len() {
            return Err(format!(
                "receipt is misaligned: {} tx ids, {} root ids",
                record.tx_ids.len(),
                record.root_ids.len()
            ));
        }
        Ok(Self {
            tx_ids: record.tx_ids,
            root_ids: record.root_ids,
        })
    }
}

impl UploadReceipt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the ids of the next fragment
    pub fn push(&mut self, tx_id: TxId, root_id: RootId) {
        self.tx_ids.push(tx_id);
        self.root_ids.push(root_id);
    }

    pub fn len(&self) -> usize {
        self.root_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root_ids.is_empty()
    }

    pub fn tx_ids(&self) -> &[TxId] {
        &self.tx_ids
    }

    pub fn root_ids(&self) -> &[RootId] {
        &self.root_ids
    }

    /// (tx id, root id) per fragment, in fragment order
    pub fn entries(&self) -> impl Iterator<Item = (&TxId, &RootId)> {
        self.tx_ids.iter().zip(self.root_ids.iter())
    }

    pub fn into_parts(self) -> (Vec<TxId>, Vec<RootId>) {
        (self.tx_ids, self.root_ids)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// How candidate nodes are ranked during selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectMethod {
    /// Nodes with the most free capacity first
    Max,

    /// Uniformly shuffled
    Random,
}

impl fmt::Display for SelectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => f.write_str("max"),
            Self::Random => f.write_str("random"),
        }
    }
}

impl FromStr for SelectMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown selection method: {other} (expected max or random)")),
        }
    }
}

/// Node selection criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSelection {
    /// Number of nodes every fragment is replicated to
    pub replicas: usize,

    /// Node ids that must not be chosen
    pub excluded: Vec<String>,

    pub method: SelectMethod,
}

impl NodeSelection {
    pub fn new(replicas: usize, method: SelectMethod) -> Self {
        Self {
            replicas,
            excluded: vec![],
            method,
        }
    }

    pub fn excluding(mut self, node_id: impl Into<String>) -> Self {
        self.excluded.push(node_id.into());
        self
    }
}

/// A serving node chosen by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    /// Node id, unique within the network
    pub id: String,

    /// Where the node is reached (URL or local directory)
    pub location: String,

    /// Fragments the node already stores
    pub stored_fragments: u64,
}

/// Upload progress tracking
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub fragments_total: usize,
    pub fragments_uploaded: usize,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub stage: UploadStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Submitting,
    Complete,
    Failed,
}

/// Download progress tracking
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub fragments_total: usize,
    pub fragments_downloaded: usize,
    pub downloaded_bytes: u64,
    pub stage: DownloadStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    Locating,
    Downloading,
    Complete,
    Failed,
}
