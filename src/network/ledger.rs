//! Append-only ledger backing the local network
//!
//! One JSON object per line, one line per fragment submission.

use super::{NetworkError, RootId, TxId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// A committed fragment submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub tx_id: TxId,

    /// Position in the ledger (1-based)
    pub sequence: u64,

    /// Submitting signer
    pub signer: String,

    pub root: RootId,

    /// Fragment index within its upload
    pub fragment_index: usize,

    pub size_bytes: u64,

    pub submitted_at: DateTime<Utc>,
}

pub struct Ledger {
    path: PathBuf,
    next_sequence: AtomicU64,
}

impl Ledger {
    /// Open (creating if needed) the ledger file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, NetworkError> {
        let path = path.as_ref().to_path_buf();

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents.lines().filter(|l| !l.trim().is_empty()).count() as u64,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::File::create(&path)
                    .await
                    .map_err(|e| NetworkError::Ledger(format!("{}: {}", path.display(), e)))?;
                0
            }
            Err(e) => return Err(NetworkError::Ledger(format!("{}: {}", path.display(), e))),
        };

        Ok(Self {
            path,
            next_sequence: AtomicU64::new(existing + 1),
        })
    }

    /// Commit one fragment submission and return its transaction id
    pub async fn submit(
        &self,
        signer: &str,
        root: &RootId,
        fragment_index: usize,
        size_bytes: u64,
    ) -> Result<LedgerRecord, NetworkError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let submitted_at = Utc::now();

        // A fresh nonce keeps resubmissions of the same root distinct
        let nonce = Uuid::new_v4();
        let mut hasher = blake3::Hasher::new();
        hasher.update(signer.as_bytes());
        hasher.update(root.as_str().as_bytes());
        hasher.update(&sequence.to_be_bytes());
        hasher.update(nonce.as_bytes());
        let tx_id = TxId::new(format!("0x{}", hasher.finalize().to_hex()));

        let record = LedgerRecord {
            tx_id,
            sequence,
            signer: signer.to_string(),
            root: root.clone(),
            fragment_index,
            size_bytes,
            submitted_at,
        };

        let mut line = serde_json::to_string(&record)
            .map_err(|e| NetworkError::Ledger(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| NetworkError::Ledger(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| NetworkError::Ledger(format!("{}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| NetworkError::Ledger(e.to_string()))?;

        Ok(record)
    }

    /// All committed records, in sequence order
    pub async fn records(&self) -> Result<Vec<LedgerRecord>, NetworkError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| NetworkError::Ledger(format!("{}: {}", self.path.display(), e)))?;

        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| NetworkError::Ledger(e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_submit_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger.jsonl");
        let root = RootId::new("0xabc");

        let ledger = Ledger::open(&path).await.unwrap();
        let first = ledger.submit("0xsigner", &root, 0, 100).await.unwrap();
        let second = ledger.submit("0xsigner", &root, 0, 100).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        // Same root, same signer, still two distinct commitments
        assert_ne!(first.tx_id, second.tx_id);

        let reopened = Ledger::open(&path).await.unwrap();
        let third = reopened.submit("0xsigner", &root, 1, 50).await.unwrap();
        assert_eq!(third.sequence, 3);

        let records = reopened.records().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], first);
        assert_eq!(records[2].fragment_index, 1);
    }

    #[tokio::test]
    async fn test_open_in_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("ledger.jsonl");

        let result = Ledger::open(&path).await;
        assert!(matches!(result, Err(NetworkError::Ledger(_))));
    }
}
