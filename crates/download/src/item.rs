//! Queue items and snapshots.

use std::fmt;
use std::time::Duration;

use cloudport_protocol::FileEntry;
use cloudport_transfer::{LARGE_FILE_THRESHOLD, format_bytes, percent};

use crate::strategy::ExpansionConfig;

/// Lifecycle of a queued download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Waiting,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl TransferStatus {
    /// Completed and failed items no longer hold a slot or a buffer.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A file to put on the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub file_id: u64,
    pub name: String,
    /// Expected size; zero if unknown until the stream reports it.
    pub size: u64,
}

impl From<&FileEntry> for DownloadTarget {
    fn from(entry: &FileEntry) -> Self {
        Self {
            file_id: entry.id,
            name: entry.name.clone(),
            size: entry.size,
        }
    }
}

/// Snapshot of one queue item.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferItem {
    pub id: u64,
    pub file_id: u64,
    pub name: String,
    pub total_size: u64,
    /// Bytes held for this item. Also the offset a resume starts from.
    pub downloaded_bytes: u64,
    pub status: TransferStatus,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
    /// Human-readable failure detail, set while `Failed`.
    pub error: Option<String>,
}

impl TransferItem {
    /// Progress, 0 to 100.
    pub fn percent(&self) -> f64 {
        if self.status == TransferStatus::Completed {
            return 100.0;
        }
        percent(self.downloaded_bytes, self.total_size)
    }

    /// One-line summary such as `report.pdf 1.5 MB / 3 MB (50%) downloading`.
    pub fn describe(&self) -> String {
        format!(
            "{} {} / {} ({:.0}%) {}",
            self.name,
            format_bytes(self.downloaded_bytes),
            format_bytes(self.total_size),
            self.percent(),
            self.status
        )
    }
}

/// Immutable view of the whole queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueState {
    /// Increases with every published change.
    pub revision: u64,
    /// Items in submission order.
    pub items: Vec<TransferItem>,
    pub active_downloads: usize,
    pub max_concurrent: usize,
}

impl QueueState {
    pub fn item(&self, id: u64) -> Option<&TransferItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn count(&self, status: TransferStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    /// Sum of the known sizes of every item.
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.total_size).sum()
    }

    /// Bytes held across all items; completed items count in full.
    pub fn transferred_bytes(&self) -> u64 {
        self.items
            .iter()
            .map(|i| match i.status {
                TransferStatus::Completed => i.total_size.max(i.downloaded_bytes),
                _ => i.downloaded_bytes,
            })
            .sum()
    }

    /// Overall progress, 0 to 100.
    pub fn percent(&self) -> f64 {
        percent(self.transferred_bytes(), self.total_bytes())
    }

    /// `true` when nothing is waiting or downloading.
    pub fn is_idle(&self) -> bool {
        self.items.iter().all(|i| {
            !matches!(
                i.status,
                TransferStatus::Waiting | TransferStatus::Downloading
            )
        })
    }
}

/// Queue tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Ceiling on simultaneous downloads, at least 1.
    pub max_concurrent: usize,
    /// Files at or above this size are queued rather than fetched directly
    /// or bundled.
    pub large_file_threshold: u64,
    pub expansion: ExpansionConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            large_file_threshold: LARGE_FILE_THRESHOLD,
            expansion: ExpansionConfig::default(),
        }
    }
}
