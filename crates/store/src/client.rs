//! Object store trait consumed by the upload coordinator and download queue.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use cloudport_protocol::{
    CompleteUploadRequest, CreateFileRequest, DownloadInfo, DownloadRequest, DownloadResponse,
    FileCreated, FolderListing, InitUploadRequest, InitUploadResponse, PrecheckRequest,
    PrecheckResponse,
};
use futures_util::Stream;

use crate::error::StoreError;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Incremental body of a download.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send>>;

/// An open download.
pub struct DownloadStream {
    pub body: ByteStream,
    /// Absolute offset of the first byte of `body`. Zero when the store
    /// ignored the requested range.
    pub offset: u64,
    /// Size of the whole file, when the store reported it.
    pub total_size: Option<u64>,
    pub accepts_ranges: bool,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("offset", &self.offset)
            .field("total_size", &self.total_size)
            .field("accepts_ranges", &self.accepts_ranges)
            .finish_non_exhaustive()
    }
}

/// Abstract remote object store.
///
/// Implemented over HTTP by [`HttpStoreClient`](crate::HttpStoreClient) and
/// in memory by [`MemoryStore`](crate::MemoryStore).
pub trait ObjectStoreClient: Send + Sync {
    /// Asks whether content with this fingerprint and size already exists.
    fn precheck<'a>(&'a self, req: &'a PrecheckRequest) -> StoreFuture<'a, PrecheckResponse>;

    /// Opens or re-opens a multipart session, including the parts the store
    /// already holds for it.
    fn init_large_upload<'a>(
        &'a self,
        req: &'a InitUploadRequest,
    ) -> StoreFuture<'a, InitUploadResponse>;

    /// Writes bytes to a presigned target. Returns the content tag if the
    /// store reported one.
    fn put_chunk<'a>(&'a self, target: &'a str, data: Bytes) -> StoreFuture<'a, Option<String>>;

    /// Finalizes a multipart session.
    fn complete_large_upload<'a>(
        &'a self,
        upload_id: &'a str,
        req: &'a CompleteUploadRequest,
    ) -> StoreFuture<'a, FileCreated>;

    /// Registers a file written with a single PUT.
    fn confirm_small_upload<'a>(
        &'a self,
        req: &'a CreateFileRequest,
    ) -> StoreFuture<'a, FileCreated>;

    /// Streams file content from `start` to the inclusive `end`.
    fn stream_download(
        &self,
        file_id: u64,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreFuture<'_, DownloadStream>;

    /// Lists the direct children of a folder.
    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, FolderListing>;

    /// Asks the store how it will serve a set of files (links or a bundle).
    fn request_bundle<'a>(&'a self, req: &'a DownloadRequest)
    -> StoreFuture<'a, DownloadResponse>;

    /// Metadata used to validate a ranged resume.
    fn download_info(&self, file_id: u64) -> StoreFuture<'_, DownloadInfo>;
}
