//! Upload error types.

use cloudport_store::StoreError;
use cloudport_transfer::TransferError;

/// Errors produced by the upload coordinator.
///
/// Errors raised after a multipart session exists carry its `upload_id`, so
/// a caller can retry and resume from the parts already stored.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("cancelled")]
    Cancelled,

    #[error("session init failed: {source}")]
    Init { source: StoreError },

    #[error("part {part} of session {upload_id} failed: {source}")]
    Chunk {
        upload_id: String,
        part: u32,
        source: StoreError,
    },

    #[error("reading part {part} of session {upload_id} failed: {source}")]
    ChunkRead {
        upload_id: String,
        part: u32,
        source: TransferError,
    },

    #[error("completing session {upload_id} failed: {source}")]
    Complete {
        upload_id: String,
        source: StoreError,
    },
}

impl UploadError {
    /// Session token of the failed attempt, when one was opened.
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            Self::Chunk { upload_id, .. }
            | Self::ChunkRead { upload_id, .. }
            | Self::Complete { upload_id, .. } => Some(upload_id),
            _ => None,
        }
    }

    /// `true` for cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
