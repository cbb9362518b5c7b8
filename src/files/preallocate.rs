//! Placeholder file creation without writing the full payload

use super::FileError;

use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Create (or truncate) `path` so that it is exactly `size` bytes long.
///
/// Only the trailing byte is written; everything before it is whatever the
/// filesystem hands back for a hole, normally zeros.
pub async fn create_sized_file(path: impl AsRef<Path>, size: u64) -> Result<(), FileError> {
    let path = path.as_ref();
    if size == 0 {
        return Err(FileError::InvalidSize { size });
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| FileError::io(path, e))?;

    file.seek(SeekFrom::Start(size - 1))
        .await
        .map_err(|e| FileError::io(path, e))?;

    file.write_all(&[0u8])
        .await
        .map_err(|e| FileError::io(path, e))?;

    file.flush().await.map_err(|e| FileError::io(path, e))?;

    tracing::debug!("Preallocated {} ({} bytes)", path.display(), size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_exact_length() {
        let temp_dir = TempDir::new().unwrap();

        for size in [1u64, 2, 4095, 4096, 4097, 10 * 1024 * 1024 + 3] {
            let path = temp_dir.path().join(format!("sized-{size}"));
            create_sized_file(&path, size).await.unwrap();

            let meta = tokio::fs::metadata(&path).await.unwrap();
            assert_eq!(meta.len(), size);
        }
    }

    #[tokio::test]
    async fn test_zero_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");

        let result = create_sized_file(&path, 0).await;

        assert!(matches!(result, Err(FileError::InvalidSize { size: 0 })));
        // Nothing is created for a rejected size
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_truncates_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("existing");
        tokio::fs::write(&path, vec![7u8; 8192]).await.unwrap();

        create_sized_file(&path, 16).await.unwrap();

        let data = tokio::fs::read(&path).await.unwrap();
        assert_eq!(data, vec![0u8; 16]);
    }

    #[tokio::test]
    async fn test_missing_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("no-such-dir").join("file");

        let result = create_sized_file(&path, 10).await;

        match result {
            Err(FileError::Io { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected IO error, got {other:?}"),
        }
    }
}
