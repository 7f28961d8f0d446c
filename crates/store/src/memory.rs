//! In-process object store.
//!
//! Implements the full [`ObjectStoreClient`] contract over in-memory maps:
//! content-addressed dedup, multipart sessions that survive failed attempts,
//! a folder tree, and ranged streaming. Every call is recorded, and part
//! writes and streams can be made to fail or slow down.
//!
//! Dedup hits still come with a write target and an open session, so a
//! client that distrusts its fingerprint can upload anyway.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use cloudport_protocol::{
    CompleteUploadRequest, CreateFileRequest, DownloadDetail, DownloadInfo, DownloadKind,
    DownloadRequest, DownloadResponse, FileCreated, FileEntry, FolderListing, InitUploadRequest,
    InitUploadResponse, PartStatus, PartTarget, PrecheckRequest, PrecheckResponse,
};
use cloudport_transfer::{checksum_bytes, join_remote_path, plan, split_remote_path, total_parts};
use futures_util::stream;
use tracing::debug;

use crate::client::{DownloadStream, ObjectStoreClient, StoreFuture};
use crate::error::StoreError;

const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;
const OWNER_ID: u64 = 1;
const CODE_NOT_FOUND: i32 = 40400;
const CODE_BAD_REQUEST: i32 = 40000;
const CODE_RANGE: i32 = 41600;

/// A call observed by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Precheck { hash: String, size: u64 },
    InitUpload { hash: String, size: u64 },
    PutChunk { target: String, len: usize },
    Complete { upload_id: String, parts: Vec<u32> },
    ConfirmSmall { path: String },
    Stream { file_id: u64, start: Option<u64>, end: Option<u64> },
    ListFolder { path: String },
    Bundle { file_ids: Vec<u64> },
    DownloadInfo { file_id: u64 },
}

struct StoredFile {
    entry: FileEntry,
    data: Bytes,
}

struct Session {
    name: String,
    parent_path: String,
    size: u64,
    hash: String,
    chunk_size: u64,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    entries: BTreeMap<u64, StoredFile>,
    by_fingerprint: HashMap<(String, u64), u64>,
    sessions: HashMap<String, Session>,
    objects: HashMap<String, Bytes>,
    calls: Vec<StoreCall>,
    failing_parts: HashSet<u32>,
    stream_failures: HashMap<u64, u64>,
    segment_size: usize,
    segment_delay: Duration,
    accept_ranges: bool,
    chunk_size_override: Option<u64>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_path(&self, path: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, f)| f.entry.path == path)
            .map(|(id, _)| *id)
    }

    /// Creates every missing folder along `path`.
    fn ensure_folder(&mut self, path: &str) {
        if path == "/" || path.is_empty() || self.find_path(path).is_some() {
            return;
        }
        let (parent, name) = split_remote_path(path);
        self.ensure_folder(&parent);
        let id = self.next_id();
        self.entries.insert(
            id,
            StoredFile {
                entry: FileEntry::folder(id, name, path),
                data: Bytes::new(),
            },
        );
    }

    fn insert_file(&mut self, path: &str, data: Bytes, fingerprint: String) -> u64 {
        let (parent, name) = split_remote_path(path);
        self.ensure_folder(&parent);
        let id = self.next_id();
        let size = data.len() as u64;
        self.entries.insert(
            id,
            StoredFile {
                entry: FileEntry::file(id, name, path, size),
                data,
            },
        );
        self.by_fingerprint.insert((fingerprint, size), id);
        id
    }

    fn file(&self, file_id: u64) -> Result<&StoredFile, StoreError> {
        self.entries
            .get(&file_id)
            .filter(|f| !f.entry.is_dir)
            .ok_or_else(|| not_found(format!("file {file_id}")))
    }
}

fn not_found(what: String) -> StoreError {
    StoreError::Api {
        code: CODE_NOT_FOUND,
        message: format!("{what} not found"),
    }
}

fn bad_request(message: String) -> StoreError {
    StoreError::Api {
        code: CODE_BAD_REQUEST,
        message,
    }
}

/// In-memory implementation of [`ObjectStoreClient`].
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                segment_size: DEFAULT_SEGMENT_SIZE,
                accept_ranges: true,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a file at `path`, creating parent folders. Returns its id.
    pub fn add_file(&self, path: &str, data: impl Into<Bytes>) -> u64 {
        let data = data.into();
        let fingerprint = checksum_bytes(&data);
        self.lock().insert_file(path, data, fingerprint)
    }

    /// Creates a folder (and its parents). Returns its id.
    pub fn add_folder(&self, path: &str) -> u64 {
        let mut state = self.lock();
        state.ensure_folder(path);
        state.find_path(path).unwrap_or_default()
    }

    /// Content of a stored file.
    pub fn file_data(&self, file_id: u64) -> Option<Bytes> {
        self.lock().file(file_id).ok().map(|f| f.data.clone())
    }

    /// Looks up a file or folder id by path.
    pub fn find(&self, path: &str) -> Option<u64> {
        self.lock().find_path(path)
    }

    /// Makes every write to `part` fail until cleared.
    pub fn fail_part(&self, part: u32) {
        self.lock().failing_parts.insert(part);
    }

    /// Makes the next stream of `file_id` fail once it reaches `offset`.
    pub fn fail_stream_at(&self, file_id: u64, offset: u64) {
        self.lock().stream_failures.insert(file_id, offset);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_parts.clear();
        state.stream_failures.clear();
    }

    /// Size of each streamed segment.
    pub fn set_segment_size(&self, size: usize) {
        self.lock().segment_size = size.max(1);
    }

    /// Delay before each streamed segment.
    pub fn set_segment_delay(&self, delay: Duration) {
        self.lock().segment_delay = delay;
    }

    /// When disabled, range requests are ignored and streams restart at 0.
    pub fn set_accept_ranges(&self, accept: bool) {
        self.lock().accept_ranges = accept;
    }

    /// Forces the chunk size reported for new multipart sessions.
    pub fn set_chunk_size(&self, chunk_size: u64) {
        self.lock().chunk_size_override = Some(chunk_size);
    }

    /// Every call observed so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Number of chunk/object writes observed.
    pub fn put_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, StoreCall::PutChunk { .. }))
            .count()
    }

    /// `(file_id, start)` of every stream request.
    pub fn stream_requests(&self) -> Vec<(u64, Option<u64>)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::Stream { file_id, start, .. } => Some((*file_id, *start)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of multipart sessions still open.
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }
}

fn part_key(upload_id: &str, part: u32) -> String {
    format!("{OWNER_ID}/chunks/{upload_id}/{part}")
}

/// Parses `mem://upload/{upload_id}/{part}`.
fn parse_part_target(target: &str) -> Option<(&str, u32)> {
    let rest = target.strip_prefix("mem://upload/")?;
    let (upload_id, part) = rest.rsplit_once('/')?;
    Some((upload_id, part.parse().ok()?))
}

impl ObjectStoreClient for MemoryStore {
    fn precheck<'a>(&'a self, req: &'a PrecheckRequest) -> StoreFuture<'a, PrecheckResponse> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::Precheck {
                hash: req.hash.clone(),
                size: req.size,
            });
            let hit = state
                .by_fingerprint
                .get(&(req.hash.clone(), req.size))
                .copied();
            let object = state.next_id();
            Ok(PrecheckResponse {
                file_exists: hit.is_some(),
                file_id: hit,
                presigned_url: Some(format!("mem://object/{object}?sig=test")),
            })
        })
    }

    fn init_large_upload<'a>(
        &'a self,
        req: &'a InitUploadRequest,
    ) -> StoreFuture<'a, InitUploadResponse> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::InitUpload {
                hash: req.hash.clone(),
                size: req.size,
            });
            let hit = state
                .by_fingerprint
                .get(&(req.hash.clone(), req.size))
                .copied();

            let existing = state
                .sessions
                .iter()
                .find(|(_, s)| {
                    s.hash == req.hash
                        && s.size == req.size
                        && s.name == req.name
                        && s.parent_path == req.parent_path
                })
                .map(|(id, _)| id.clone());
            let upload_id = match existing {
                Some(id) => id,
                None => {
                    let id = format!("up-{}", state.next_id());
                    let chunk_size = state
                        .chunk_size_override
                        .or((req.preferred_chunk_size > 0).then_some(req.preferred_chunk_size))
                        .unwrap_or_else(|| plan(req.size).chunk_size);
                    state.sessions.insert(
                        id.clone(),
                        Session {
                            name: req.name.clone(),
                            parent_path: req.parent_path.clone(),
                            size: req.size,
                            hash: req.hash.clone(),
                            chunk_size,
                            parts: BTreeMap::new(),
                        },
                    );
                    id
                }
            };

            let session = state
                .sessions
                .get(&upload_id)
                .ok_or_else(|| not_found(format!("session {upload_id}")))?;
            let total = total_parts(session.size, session.chunk_size);
            let chunk_urls = (1..=total)
                .filter(|p| !session.parts.contains_key(p))
                .map(|p| PartTarget {
                    part_number: p,
                    presigned_url: format!("mem://upload/{upload_id}/{p}"),
                })
                .collect();
            let existing_parts = session
                .parts
                .iter()
                .map(|(p, (_, tag))| PartStatus {
                    object_key: part_key(&upload_id, *p),
                    etag: tag.clone(),
                })
                .collect();
            debug!(upload_id = %upload_id, stored = session.parts.len(), total, "session opened");

            Ok(InitUploadResponse {
                file_exists: hit.is_some(),
                file_id: hit,
                upload_id: upload_id.clone(),
                chunk_urls,
                optimal_chunk_size: session.chunk_size,
                recommended_concurrency: plan(req.size).concurrency as u32,
                existing_parts,
            })
        })
    }

    fn put_chunk<'a>(&'a self, target: &'a str, data: Bytes) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::PutChunk {
                target: target.to_string(),
                len: data.len(),
            });
            let tag = checksum_bytes(&data);

            if let Some((upload_id, part)) = parse_part_target(target) {
                if state.failing_parts.contains(&part) {
                    return Err(StoreError::Network(format!(
                        "injected failure writing part {part}"
                    )));
                }
                let session = state
                    .sessions
                    .get_mut(upload_id)
                    .ok_or_else(|| not_found(format!("session {upload_id}")))?;
                session.parts.insert(part, (data, tag.clone()));
                return Ok(Some(tag));
            }

            if target.starts_with("mem://object/") {
                state.objects.insert(target.to_string(), data);
                return Ok(Some(tag));
            }

            Err(not_found(format!("write target {target}")))
        })
    }

    fn complete_large_upload<'a>(
        &'a self,
        upload_id: &'a str,
        req: &'a CompleteUploadRequest,
    ) -> StoreFuture<'a, FileCreated> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::Complete {
                upload_id: upload_id.to_string(),
                parts: req.uploaded_chunks.iter().map(|c| c.part_number).collect(),
            });

            let session = state
                .sessions
                .get(upload_id)
                .ok_or_else(|| not_found(format!("session {upload_id}")))?;
            let total = total_parts(session.size, session.chunk_size);
            let listed: Vec<u32> = req.uploaded_chunks.iter().map(|c| c.part_number).collect();
            if listed != (1..=total).collect::<Vec<_>>() {
                return Err(bad_request(format!(
                    "session {upload_id}: parts must be 1..={total} in order"
                )));
            }

            let mut assembled = Vec::with_capacity(session.size as usize);
            for chunk in &req.uploaded_chunks {
                let (data, tag) = session.parts.get(&chunk.part_number).ok_or_else(|| {
                    bad_request(format!("part {} was never stored", chunk.part_number))
                })?;
                if *tag != chunk.etag {
                    return Err(bad_request(format!(
                        "part {} tag mismatch",
                        chunk.part_number
                    )));
                }
                assembled.extend_from_slice(data);
            }
            if assembled.len() as u64 != session.size {
                return Err(bad_request(format!(
                    "assembled {} bytes, expected {}",
                    assembled.len(),
                    session.size
                )));
            }

            let path = join_remote_path(&session.parent_path, &session.name);
            let hash = session.hash.clone();
            state.sessions.remove(upload_id);
            let id = state.insert_file(&path, Bytes::from(assembled), hash);
            Ok(FileCreated {
                file_id: id,
                file_url: format!("mem://files/{id}"),
            })
        })
    }

    fn confirm_small_upload<'a>(
        &'a self,
        req: &'a CreateFileRequest,
    ) -> StoreFuture<'a, FileCreated> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::ConfirmSmall {
                path: req.path.clone(),
            });

            let key = state
                .objects
                .keys()
                .find(|k| k.split('?').next() == Some(req.url.as_str()))
                .cloned()
                .ok_or_else(|| not_found(format!("object {}", req.url)))?;
            let data = state.objects.remove(&key).unwrap_or_default();
            if data.len() as u64 != req.size {
                return Err(bad_request(format!(
                    "object holds {} bytes, expected {}",
                    data.len(),
                    req.size
                )));
            }
            let id = state.insert_file(&req.path, data, req.hash.clone());
            Ok(FileCreated {
                file_id: id,
                file_url: format!("mem://files/{id}"),
            })
        })
    }

    fn stream_download(
        &self,
        file_id: u64,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreFuture<'_, DownloadStream> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::Stream {
                file_id,
                start,
                end,
            });
            let data = state.file(file_id)?.data.clone();
            let total = data.len() as u64;
            let accept_ranges = state.accept_ranges;

            let (offset, last) = if accept_ranges {
                (start.unwrap_or(0), end.map_or(total, |e| (e + 1).min(total)))
            } else {
                (0, total)
            };
            if offset > total || offset > last {
                return Err(StoreError::Api {
                    code: CODE_RANGE,
                    message: format!("range {offset}- not satisfiable for {total} bytes"),
                });
            }

            let body = data.slice(offset as usize..last as usize);
            let segment = state.segment_size;
            let delay = state.segment_delay;
            let fail_at = state.stream_failures.remove(&file_id);
            drop(state);

            let body = stream::unfold(0usize, move |pos| {
                let body = body.clone();
                async move {
                    if pos >= body.len() {
                        return None;
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if let Some(fail_at) = fail_at
                        && offset + pos as u64 >= fail_at
                    {
                        let err = StoreError::Network(format!("injected stream failure at {fail_at}"));
                        return Some((Err(err), body.len()));
                    }
                    let next = (pos + segment).min(body.len());
                    Some((Ok(body.slice(pos..next)), next))
                }
            });

            Ok(DownloadStream {
                body: Box::pin(body),
                offset,
                total_size: Some(total),
                accepts_ranges: accept_ranges,
            })
        })
    }

    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, FolderListing> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::ListFolder {
                path: path.to_string(),
            });
            let wanted = if path.is_empty() { "/" } else { path };
            if wanted != "/" && state.find_path(wanted).is_none() {
                return Err(not_found(format!("folder {wanted}")));
            }

            let contents: Vec<FileEntry> = state
                .entries
                .values()
                .filter(|f| split_remote_path(&f.entry.path).0 == wanted)
                .map(|f| f.entry.clone())
                .collect();
            Ok(FolderListing {
                path: wanted.to_string(),
                total: contents.len() as u64,
                contents,
            })
        })
    }

    fn request_bundle<'a>(
        &'a self,
        req: &'a DownloadRequest,
    ) -> StoreFuture<'a, DownloadResponse> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::Bundle {
                file_ids: req.file_ids.clone(),
            });

            let mut files = Vec::with_capacity(req.file_ids.len());
            for id in &req.file_ids {
                let file = state.file(*id)?;
                files.push(DownloadDetail {
                    id: *id,
                    name: file.entry.name.clone(),
                    size: file.entry.size,
                    dlink: Some(format!("mem://files/{id}")),
                });
            }
            let total_size = files.iter().map(|f| f.size).sum();

            if files.len() == 1 {
                return Ok(DownloadResponse {
                    kind: DownloadKind::Single,
                    dlink: files[0].dlink.clone(),
                    files,
                    total_size,
                    zip_name: None,
                });
            }
            let bundle = state.next_id();
            let zip_name = req
                .zip_name
                .clone()
                .unwrap_or_else(|| format!("download-{bundle}.zip"));
            Ok(DownloadResponse {
                kind: DownloadKind::Zip,
                files,
                total_size,
                dlink: Some(format!("mem://bundles/{bundle}/{zip_name}")),
                zip_name: Some(zip_name),
            })
        })
    }

    fn download_info(&self, file_id: u64) -> StoreFuture<'_, DownloadInfo> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(StoreCall::DownloadInfo { file_id });
            let accept_ranges = state.accept_ranges;
            let file = state.file(file_id)?;
            Ok(DownloadInfo {
                file_id,
                file_name: file.entry.name.clone(),
                content_type: "application/octet-stream".into(),
                total_size: file.entry.size,
                accept_ranges,
                etag: checksum_bytes(&file.data),
                last_modified: None,
            })
        })
    }
}
