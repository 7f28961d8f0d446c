use serde::{Deserialize, Serialize};

use crate::types::{DownloadDetail, DownloadKind};

// ---------------------------------------------------------------------------
// Upload: precheck / small-file path
// ---------------------------------------------------------------------------

/// Asks whether content with this fingerprint already exists server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecheckRequest {
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub parent_path: String,
}

/// Precheck answer. When the file does not exist, `presigned_url` is the
/// write target for a single-PUT upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecheckResponse {
    #[serde(default)]
    pub file_exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
}

/// Registers a file after its bytes were PUT to the write target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub hash: String,
    pub url: String,
    pub is_dir: bool,
    pub device_id: String,
}

/// Identity of a file the store has created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreated {
    pub file_id: u64,
    #[serde(default)]
    pub file_url: String,
}

// ---------------------------------------------------------------------------
// Upload: multipart path
// ---------------------------------------------------------------------------

/// Opens (or re-opens) a multipart upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub parent_path: String,
    pub preferred_chunk_size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_info: String,
}

/// Write target for one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartTarget {
    pub part_number: u32,
    pub presigned_url: String,
}

/// A part the store already holds durably for this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartStatus {
    pub object_key: String,
    pub etag: String,
}

/// Multipart session description.
///
/// `existing_parts` is returned in the same call as the write targets so
/// resuming never needs a second status query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    #[serde(default)]
    pub file_exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub chunk_urls: Vec<PartTarget>,
    #[serde(default)]
    pub optimal_chunk_size: u64,
    #[serde(default)]
    pub recommended_concurrency: u32,
    #[serde(default)]
    pub existing_parts: Vec<PartStatus>,
}

/// Content tag recorded for one stored part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedChunk {
    pub part_number: u32,
    pub etag: String,
}

/// Finalizes a multipart session. Parts must be sorted by part number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub uploaded_chunks: Vec<UploadedChunk>,
    pub file_hash: String,
    pub file_name: String,
    pub parent_path: String,
    pub client_fingerprint: String,
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Requests download links, or a server-side bundle for several files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub file_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_name: Option<String>,
}

/// How the store will serve a [`DownloadRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    #[serde(rename = "type")]
    pub kind: DownloadKind,
    #[serde(default)]
    pub files: Vec<DownloadDetail>,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlink: Option<String>,
}

/// Metadata used to validate a ranged download before it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    pub file_id: u64,
    pub file_name: String,
    #[serde(default)]
    pub content_type: String,
    pub total_size: u64,
    #[serde(default)]
    pub accept_ranges: bool,
    #[serde(default)]
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}
