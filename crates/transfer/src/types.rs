use std::collections::{BTreeMap, HashMap};

use cloudport_protocol::{PartStatus, PartTarget, UploadedChunk, part_number_from_object_key};
use tracing::debug;

use crate::TransferError;
use crate::planner::{part_range, total_parts};

/// One part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 1-based part number.
    pub part_number: u32,
    /// Inclusive start offset.
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
    /// Write target, present for parts that still need uploading.
    pub target: Option<String>,
    /// Content tag reported by the store once the part is durable.
    pub content_tag: Option<String>,
}

impl ChunkDescriptor {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A multipart upload session as seen by the client.
///
/// Parts are dense and numbered `1..=total`. A part is either satisfied by
/// server state or pending with a write target, never both.
#[derive(Debug, Clone)]
pub struct UploadSession {
    upload_id: String,
    fingerprint: String,
    file_size: u64,
    chunk_size: u64,
    concurrency: usize,
    parts: BTreeMap<u32, ChunkDescriptor>,
    satisfied: Vec<u32>,
}

impl UploadSession {
    /// Builds a session from the store's init response.
    ///
    /// Existing parts whose object key does not parse, or that lie outside
    /// `1..=total`, are ignored and re-uploaded. Every part that is not
    /// satisfied must have a write target.
    pub fn new(
        upload_id: impl Into<String>,
        fingerprint: impl Into<String>,
        file_size: u64,
        chunk_size: u64,
        concurrency: usize,
        targets: &[PartTarget],
        existing: &[PartStatus],
    ) -> Result<Self, TransferError> {
        let upload_id = upload_id.into();
        if chunk_size == 0 {
            return Err(TransferError::ProtocolMismatch(format!(
                "session {upload_id}: chunk size is zero"
            )));
        }
        let total = total_parts(file_size, chunk_size);

        let mut stored: HashMap<u32, String> = HashMap::new();
        for status in existing {
            match part_number_from_object_key(&status.object_key) {
                Some(part) if part <= total => {
                    stored.insert(part, status.etag.clone());
                }
                _ => debug!(
                    upload_id = %upload_id,
                    object_key = %status.object_key,
                    "ignoring unrecognized stored part"
                ),
            }
        }

        let by_part: HashMap<u32, &str> = targets
            .iter()
            .map(|t| (t.part_number, t.presigned_url.as_str()))
            .collect();

        let mut parts = BTreeMap::new();
        let mut satisfied = Vec::new();
        for part_number in 1..=total {
            let (start, end) = part_range(part_number, chunk_size, file_size);
            let descriptor = match stored.remove(&part_number) {
                Some(tag) => {
                    satisfied.push(part_number);
                    ChunkDescriptor {
                        part_number,
                        start,
                        end,
                        target: None,
                        content_tag: Some(tag),
                    }
                }
                None => {
                    let target = by_part.get(&part_number).ok_or_else(|| {
                        TransferError::ProtocolMismatch(format!(
                            "session {upload_id}: no write target for part {part_number}"
                        ))
                    })?;
                    ChunkDescriptor {
                        part_number,
                        start,
                        end,
                        target: Some((*target).to_string()),
                        content_tag: None,
                    }
                }
            };
            parts.insert(part_number, descriptor);
        }

        Ok(Self {
            upload_id,
            fingerprint: fingerprint.into(),
            file_size,
            chunk_size,
            concurrency,
            parts,
            satisfied,
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn total_parts(&self) -> u32 {
        self.parts.len() as u32
    }

    /// Part numbers the store already held when the session opened.
    pub fn satisfied_parts(&self) -> &[u32] {
        &self.satisfied
    }

    /// Parts without a content tag, in part order.
    pub fn pending(&self) -> Vec<ChunkDescriptor> {
        self.parts
            .values()
            .filter(|c| c.content_tag.is_none())
            .cloned()
            .collect()
    }

    /// Records the content tag of a freshly uploaded part.
    pub fn record_tag(&mut self, part_number: u32, tag: impl Into<String>) -> Result<(), TransferError> {
        let chunk = self.parts.get_mut(&part_number).ok_or_else(|| {
            TransferError::ProtocolMismatch(format!(
                "session {}: part {part_number} out of range",
                self.upload_id
            ))
        })?;
        chunk.content_tag = Some(tag.into());
        Ok(())
    }

    /// `true` once every part has a content tag.
    pub fn is_complete(&self) -> bool {
        self.parts.values().all(|c| c.content_tag.is_some())
    }

    /// Full tag list sorted by part number.
    ///
    /// Fails if any part is still missing its tag.
    pub fn ordered_tags(&self) -> Result<Vec<UploadedChunk>, TransferError> {
        self.parts
            .values()
            .map(|c| {
                c.content_tag
                    .as_ref()
                    .map(|etag| UploadedChunk {
                        part_number: c.part_number,
                        etag: etag.clone(),
                    })
                    .ok_or_else(|| {
                        TransferError::ProtocolMismatch(format!(
                            "session {}: part {} has no content tag",
                            self.upload_id, c.part_number
                        ))
                    })
            })
            .collect()
    }
}
