//! Transfer primitives shared by the upload coordinator and the download
//! queue: content fingerprints, chunk planning, bounded concurrency, and
//! smoothed speed estimation.

mod chunked;
mod fingerprint;
mod limiter;
mod planner;
mod progress;
mod types;
mod validation;

pub use chunked::{PartReader, calculate_file_checksum, checksum_bytes};
pub use fingerprint::{
    Confidence, ContentAddresser, DigestBackend, Fingerprint, FingerprintConfig, rolling_hash,
};
pub use limiter::run_bounded;
pub use planner::{ChunkPlan, MAX_CONCURRENCY, clamp_concurrency, part_range, plan, total_parts};
pub use progress::{SpeedEstimator, format_bytes, percent};
pub use types::{ChunkDescriptor, UploadSession};
pub use validation::{
    artifact_file_name, join_remote_path, split_remote_path, validate_relative_path,
};

/// Files at or above this size take the sampled-fingerprint and multipart
/// paths, and count as "large" when choosing a download strategy: 100 MiB.
pub const LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}
