//! Object store client over the HTTP API.
//!
//! Async HTTP client using `reqwest`. API calls carry the provider's auth
//! headers and return an [`ApiEnvelope`]; presigned PUTs go out bare.

use std::sync::Arc;

use bytes::Bytes;
use cloudport_protocol::constants::ACCESS_TOKEN_HEADER;
use cloudport_protocol::{
    ApiEnvelope, CompleteUploadRequest, CreateFileRequest, DownloadInfo, DownloadRequest,
    DownloadResponse, FileCreated, FolderListing, InitUploadRequest, InitUploadResponse,
    PrecheckRequest, PrecheckResponse,
};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_RANGE, ETAG, RANGE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::AuthProvider;
use crate::client::{DownloadStream, ObjectStoreClient, StoreFuture};
use crate::error::StoreError;

/// HTTP implementation of [`ObjectStoreClient`].
pub struct HttpStoreClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
}

impl HttpStoreClient {
    /// Creates a client rooted at `base_url` (e.g. `http://host:8089`).
    pub fn new(base_url: &str, auth: Arc<dyn AuthProvider>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Sends an authenticated API request and unwraps the envelope.
    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let resp = builder.headers(self.auth.auth_headers()).send().await?;
        let resp = self.check_status(resp).await?;
        let body = resp.bytes().await?;
        let envelope: ApiEnvelope<T> = serde_json::from_slice(&body)?;
        envelope
            .into_result()?
            .ok_or_else(|| StoreError::Protocol("response carried no data".into()))
    }

    /// Hands refreshed tokens to the provider and maps error statuses.
    async fn check_status(&self, resp: Response) -> Result<Response, StoreError> {
        if let Some(token) = resp
            .headers()
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.auth.refresh_token(token);
        }

        let status = resp.status().as_u16();
        if self.auth.is_auth_error(status) {
            return Err(StoreError::Auth { status });
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status, body));
        }
        Ok(resp)
    }
}

/// Builds an `Api` error, preferring the envelope's code and message.
fn api_error(status: u16, body: String) -> StoreError {
    match serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body) {
        Ok(envelope) if !envelope.msg.is_empty() => StoreError::Api {
            code: envelope.code,
            message: envelope.msg,
        },
        _ => StoreError::Api {
            code: i32::from(status),
            message: body,
        },
    }
}

/// `Range` header value for an optional start and inclusive end.
fn range_header(start: Option<u64>, end: Option<u64>) -> Option<String> {
    match (start, end) {
        (None, None) => None,
        (start, Some(end)) => Some(format!("bytes={}-{end}", start.unwrap_or(0))),
        (Some(start), None) => Some(format!("bytes={start}-")),
    }
}

/// Parses `bytes start-end/total` into `(start, total)`.
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes ")?;
    let (range, total) = spec.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = total.trim().parse().ok();
    Some((start, total))
}

impl ObjectStoreClient for HttpStoreClient {
    fn precheck<'a>(&'a self, req: &'a PrecheckRequest) -> StoreFuture<'a, PrecheckResponse> {
        Box::pin(async move {
            self.call(self.http.post(self.url("/files/precreate")).json(req))
                .await
        })
    }

    fn init_large_upload<'a>(
        &'a self,
        req: &'a InitUploadRequest,
    ) -> StoreFuture<'a, InitUploadResponse> {
        Box::pin(async move {
            self.call(self.http.post(self.url("/files/preupload")).json(req))
                .await
        })
    }

    fn put_chunk<'a>(&'a self, target: &'a str, data: Bytes) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let len = data.len();
            let resp = self.http.put(target).body(data).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(StoreError::Api {
                    code: i32::from(status.as_u16()),
                    message: format!("object write rejected: {body}"),
                });
            }
            let tag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string())
                .filter(|v| !v.is_empty());
            debug!(bytes = len, tag = ?tag, "object written");
            Ok(tag)
        })
    }

    fn complete_large_upload<'a>(
        &'a self,
        upload_id: &'a str,
        req: &'a CompleteUploadRequest,
    ) -> StoreFuture<'a, FileCreated> {
        Box::pin(async move {
            let builder = self
                .http
                .post(self.url("/files/upload/complete"))
                .query(&[("uploadId", upload_id)])
                .json(req);
            self.call(builder).await
        })
    }

    fn confirm_small_upload<'a>(
        &'a self,
        req: &'a CreateFileRequest,
    ) -> StoreFuture<'a, FileCreated> {
        Box::pin(async move { self.call(self.http.post(self.url("/files/create")).json(req)).await })
    }

    fn stream_download(
        &self,
        file_id: u64,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreFuture<'_, DownloadStream> {
        Box::pin(async move {
            let mut builder = self
                .http
                .get(self.url(&format!("/files/download/{file_id}/stream")))
                .headers(self.auth.auth_headers());
            if let Some(range) = range_header(start, end) {
                builder = builder.header(RANGE, range);
            }

            let resp = self.check_status(builder.send().await?).await?;
            let partial = resp.status() == StatusCode::PARTIAL_CONTENT;
            let content_range = resp
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range);
            let accepts_ranges = partial
                || resp
                    .headers()
                    .get(ACCEPT_RANGES)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

            let (offset, total_size) = match (partial, content_range) {
                (true, Some((offset, total))) => (offset, total),
                // Callers read offset 0 as "range ignored".
                (true, None) => {
                    return Err(StoreError::Protocol(format!(
                        "file {file_id}: 206 without a usable Content-Range"
                    )));
                }
                (false, _) => (0, resp.content_length()),
            };
            debug!(file_id, offset, total = ?total_size, partial, "download stream opened");

            let body = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(StoreError::from));
            Ok(DownloadStream {
                body: Box::pin(body),
                offset,
                total_size,
                accepts_ranges,
            })
        })
    }

    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, FolderListing> {
        Box::pin(async move {
            self.call(self.http.get(self.url("/files")).query(&[("path", path)]))
                .await
        })
    }

    fn request_bundle<'a>(
        &'a self,
        req: &'a DownloadRequest,
    ) -> StoreFuture<'a, DownloadResponse> {
        Box::pin(async move {
            self.call(self.http.post(self.url("/files/download")).json(req))
                .await
        })
    }

    fn download_info(&self, file_id: u64) -> StoreFuture<'_, DownloadInfo> {
        Box::pin(async move {
            self.call(
                self.http
                    .get(self.url(&format!("/files/download/{file_id}/progress"))),
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one full HTTP request (head plus `Content-Length` body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Starts a one-shot mock HTTP server. The handle yields the raw request.
    async fn mock_server(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");

        let handle = tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return String::new();
            };
            let request = read_request(&mut stream).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            request
        });

        (url, handle)
    }

    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut resp = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            resp.push_str(&format!("{name}: {value}\r\n"));
        }
        resp.push_str("\r\n");
        resp.push_str(body);
        resp
    }

    fn json_ok(body: &str) -> String {
        http_response("200 OK", &[("Content-Type", "application/json")], body)
    }

    fn client(url: &str, auth: Arc<TokenAuth>) -> HttpStoreClient {
        HttpStoreClient::new(url, auth).unwrap()
    }

    fn precheck_request() -> PrecheckRequest {
        PrecheckRequest {
            name: "a.txt".into(),
            size: 12,
            hash: "abc".into(),
            parent_path: "/".into(),
        }
    }

    #[tokio::test]
    async fn precheck_sends_auth_and_parses_envelope() {
        let (url, handle) = mock_server(json_ok(
            r#"{"code":20000,"msg":"success","data":{"fileExists":false,"presignedUrl":"http://s/put"}}"#,
        ))
        .await;
        let auth = Arc::new(TokenAuth::new(Some("tok".into())));

        let resp = client(&url, auth).precheck(&precheck_request()).await.unwrap();
        assert!(!resp.file_exists);
        assert_eq!(resp.presigned_url.as_deref(), Some("http://s/put"));

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /files/precreate "), "{request}");
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("authorization: bearer tok"));
        assert!(request.contains(r#""parentPath":"/""#));
    }

    #[tokio::test]
    async fn envelope_failure_is_api_error() {
        let (url, handle) = mock_server(json_ok(r#"{"code":40001,"msg":"bad hash"}"#)).await;

        let err = client(&url, Arc::new(TokenAuth::default()))
            .precheck(&precheck_request())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, StoreError::Api { code: 40001, message } if message == "bad hash"),
            "{err}"
        );
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth() {
        let (url, handle) = mock_server(http_response("401 Unauthorized", &[], "")).await;

        let err = client(&url, Arc::new(TokenAuth::new(Some("expired".into()))))
            .list_folder("/")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Auth { status: 401 }));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn http_error_with_envelope_body() {
        let (url, handle) = mock_server(http_response(
            "500 Internal Server Error",
            &[],
            r#"{"code":50000,"msg":"storage offline"}"#,
        ))
        .await;

        let err = client(&url, Arc::new(TokenAuth::default()))
            .download_info(3)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Api { code: 50000, .. }));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn refreshed_token_reaches_provider() {
        let response = http_response(
            "200 OK",
            &[("x-access-token", "fresh")],
            r#"{"code":20000,"msg":"","data":{"path":"/","contents":[],"total":0}}"#,
        );
        let (url, handle) = mock_server(response).await;
        let auth = Arc::new(TokenAuth::new(Some("stale".into())));

        client(&url, Arc::clone(&auth)).list_folder("/").await.unwrap();
        assert_eq!(auth.current_credential().as_deref(), Some("fresh"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn list_folder_encodes_path() {
        let (url, handle) = mock_server(json_ok(
            r#"{"code":20000,"data":{"path":"/my docs","contents":[
                {"id":1,"name":"a.txt","path":"/my docs/a.txt","isDir":false,"size":3}
            ],"total":1}}"#,
        ))
        .await;

        let listing = client(&url, Arc::new(TokenAuth::default()))
            .list_folder("/my docs")
            .await
            .unwrap();
        assert_eq!(listing.contents.len(), 1);
        assert_eq!(listing.contents[0].size, 3);

        let request = handle.await.unwrap();
        assert!(request.starts_with("GET /files?path=%2Fmy+docs "), "{request}");
    }

    #[tokio::test]
    async fn put_chunk_strips_etag_and_skips_auth() {
        let (url, handle) =
            mock_server(http_response("200 OK", &[("ETag", "\"d41d8cd9\"")], "")).await;
        let target = format!("{url}/bucket/part-1?sig=xyz");

        let tag = client(&url, Arc::new(TokenAuth::new(Some("tok".into()))))
            .put_chunk(&target, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(tag.as_deref(), Some("d41d8cd9"));

        let request = handle.await.unwrap();
        assert!(request.starts_with("PUT /bucket/part-1?sig=xyz "));
        assert!(!request.to_ascii_lowercase().contains("authorization"));
        assert!(request.ends_with("hello"));
    }

    #[tokio::test]
    async fn put_chunk_without_etag() {
        let (url, handle) = mock_server(http_response("200 OK", &[], "")).await;

        let tag = client(&url, Arc::new(TokenAuth::default()))
            .put_chunk(&format!("{url}/obj"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(tag.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn put_chunk_rejection_is_api_error() {
        let (url, handle) = mock_server(http_response("403 Forbidden", &[], "expired")).await;

        let err = client(&url, Arc::new(TokenAuth::default()))
            .put_chunk(&format!("{url}/obj"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Api { code: 403, .. }));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn complete_passes_upload_id_in_query() {
        let (url, handle) = mock_server(json_ok(
            r#"{"code":20000,"data":{"fileId":77,"fileUrl":"http://s/f/77"}}"#,
        ))
        .await;
        let req = CompleteUploadRequest {
            uploaded_chunks: vec![],
            file_hash: "h".into(),
            file_name: "big.iso".into(),
            parent_path: "/".into(),
            client_fingerprint: "dev".into(),
        };

        let created = client(&url, Arc::new(TokenAuth::default()))
            .complete_large_upload("up-9", &req)
            .await
            .unwrap();
        assert_eq!(created.file_id, 77);

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /files/upload/complete?uploadId=up-9 "));
    }

    #[tokio::test]
    async fn ranged_stream_reports_offset_and_total() {
        let (url, handle) = mock_server(http_response(
            "206 Partial Content",
            &[("Content-Range", "bytes 5-9/10")],
            "56789",
        ))
        .await;

        let stream = client(&url, Arc::new(TokenAuth::default()))
            .stream_download(4, Some(5), None)
            .await
            .unwrap();
        assert_eq!(stream.offset, 5);
        assert_eq!(stream.total_size, Some(10));
        assert!(stream.accepts_ranges);

        let body: Vec<u8> = stream
            .body
            .map(|c| c.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(body, b"56789");

        let request = handle.await.unwrap();
        assert!(request.starts_with("GET /files/download/4/stream "));
        assert!(request.to_ascii_lowercase().contains("range: bytes=5-"));
    }

    #[tokio::test]
    async fn ignored_range_restarts_at_zero() {
        let (url, handle) = mock_server(http_response("200 OK", &[], "0123456789")).await;

        let stream = client(&url, Arc::new(TokenAuth::default()))
            .stream_download(4, Some(5), None)
            .await
            .unwrap();
        assert_eq!(stream.offset, 0);
        assert_eq!(stream.total_size, Some(10));
        assert!(!stream.accepts_ranges);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn partial_content_without_content_range_is_rejected() {
        let (url, handle) = mock_server(http_response("206 Partial Content", &[], "56789")).await;

        let result = client(&url, Arc::new(TokenAuth::default()))
            .stream_download(4, Some(5), None)
            .await;
        assert!(matches!(result, Err(StoreError::Protocol(_))));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn partial_content_with_malformed_content_range_is_rejected() {
        let (url, handle) = mock_server(http_response(
            "206 Partial Content",
            &[("Content-Range", "items 5-9/10")],
            "56789",
        ))
        .await;

        let result = client(&url, Arc::new(TokenAuth::default()))
            .stream_download(4, Some(5), None)
            .await;
        assert!(matches!(result, Err(StoreError::Protocol(_))));
        handle.await.unwrap();
    }

    #[test]
    fn range_header_forms() {
        assert_eq!(range_header(None, None), None);
        assert_eq!(range_header(Some(10), None).as_deref(), Some("bytes=10-"));
        assert_eq!(range_header(None, Some(99)).as_deref(), Some("bytes=0-99"));
        assert_eq!(range_header(Some(5), Some(9)).as_deref(), Some("bytes=5-9"));
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(parse_content_range("bytes 100-199/1000"), Some((100, Some(1000))));
        assert_eq!(parse_content_range("bytes 0-9/*"), Some((0, None)));
        assert_eq!(parse_content_range("items 0-9/10"), None);
    }
}
