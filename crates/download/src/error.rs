//! Download error types.

use cloudport_store::StoreError;
use cloudport_transfer::TransferError;

use crate::item::TransferStatus;

/// Errors produced by the download queue and strategy selector.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// The resume point lies at or past the end of the file.
    #[error("cannot resume at byte {offset}: file has {total} bytes")]
    ResumeInvalid { offset: u64, total: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("nothing selected")]
    EmptySelection,

    #[error("folder {path} nests deeper than {depth} levels")]
    ExpansionTooDeep { path: String, depth: usize },

    #[error("no queue item with id {0}")]
    UnknownItem(u64),

    #[error("cannot {action} item {id} while {from}")]
    InvalidTransition {
        id: u64,
        from: TransferStatus,
        action: &'static str,
    },
}
