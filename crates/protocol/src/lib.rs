//! Wire types for the object-store HTTP API.
//!
//! Every response body is wrapped in an [`ApiEnvelope`]; request and
//! response payloads use camelCase field names.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{SUCCESS_CODE, part_number_from_object_key};
pub use envelope::{ApiEnvelope, EnvelopeError};
pub use messages::{
    CompleteUploadRequest, CreateFileRequest, DownloadInfo, DownloadRequest, DownloadResponse,
    FileCreated, InitUploadRequest, InitUploadResponse, PartStatus, PartTarget, PrecheckRequest,
    PrecheckResponse, UploadedChunk,
};
pub use types::{DownloadDetail, DownloadKind, FileEntry, FolderListing};
