//! Upload configuration, events and results.

use std::time::Duration;

use cloudport_transfer::LARGE_FILE_THRESHOLD;

/// States of one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Hashing,
    Precheck,
    /// Content already stored; nothing transferred.
    Deduped,
    SmallUpload,
    LargeInit,
    ChunkUpload,
    Completing,
    Done,
    Failed,
}

impl UploadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deduped | Self::Done | Self::Failed)
    }
}

/// Events emitted while an upload runs.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The coordinator entered a new phase.
    Phase(UploadPhase),
    /// Overall progress, 0 to 100.
    Progress {
        percent: f64,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
}

/// Tunables for the upload coordinator.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Identifies this client to the store.
    pub device_id: String,
    /// Chunk size requested when opening a session. Defaults to the
    /// planner's tier for the file size.
    pub preferred_chunk_size: Option<u64>,
    /// Overrides the store's concurrency recommendation.
    pub concurrency: Option<usize>,
    /// Files at or above this size use the multipart path.
    pub large_file_threshold: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            device_id: "cloudport".into(),
            preferred_chunk_size: None,
            concurrency: None,
            large_file_threshold: LARGE_FILE_THRESHOLD,
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub file_id: u64,
    pub file_url: String,
    /// `true` when the store already held the content.
    pub deduplicated: bool,
    /// Multipart session token, for large uploads.
    pub upload_id: Option<String>,
    /// Parts written during this attempt.
    pub uploaded_parts: u32,
    /// Parts the store already held when the session opened.
    pub skipped_parts: u32,
}
