use std::io::{Read, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

const READ_BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
///
/// Blocking; call from `spawn_blocking` when on the runtime.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// PartReader
// ---------------------------------------------------------------------------

/// Reads byte ranges of a local file for part uploads.
///
/// Each read opens its own handle so parts can be read by concurrent tasks.
#[derive(Debug, Clone)]
pub struct PartReader {
    path: PathBuf,
    file_size: u64,
}

impl PartReader {
    /// Opens `path` and records its size.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidPath(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            file_size: metadata.len(),
        })
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Reads `[start, end)`. Fails if the file shrank below `end`.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Bytes, TransferError> {
        if end < start || end > self.file_size {
            return Err(TransferError::InvalidPath(format!(
                "range {start}..{end} outside file of {} bytes",
                self.file_size
            )));
        }
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Reads the whole file.
    pub async fn read_all(&self) -> Result<Bytes, TransferError> {
        self.read_range(0, self.file_size).await
    }
}
