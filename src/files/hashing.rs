//! BLAKE3 content hashing
//!
//! Used to address fragments on the local network and to compare a
//! downloaded file against its source.

use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// BLAKE3 digest of fragment or file content, shown as `0x` hex
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn hash(data: &[u8]) -> Self {
        blake3::hash(data).into()
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Accepts the digest with or without its `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut digest = [0u8; 32];
        hex::decode_to_slice(s.strip_prefix("0x").unwrap_or(s), &mut digest)?;
        Ok(Self(digest))
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest and length of a whole stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDigest {
    pub hash: ContentHash,
    pub len: u64,
}

/// Stream `reader` through BLAKE3 `chunk_size` bytes at a time.
///
/// Multi-gigabyte placeholder files are never held in memory at once.
pub async fn digest_reader<R>(reader: &mut R, chunk_size: usize) -> std::io::Result<FileDigest>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut len = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        len += n as u64;
    }

    Ok(FileDigest {
        hash: hasher.finalize().into(),
        len,
    })
}
