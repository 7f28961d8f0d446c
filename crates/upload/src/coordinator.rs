//! Upload coordinator.
//!
//! Drives one file through `Hashing → Precheck → {Deduped | SmallUpload |
//! LargeInit → ChunkUpload → Completing} → Done`, emitting events on the
//! coordinator's channel. Any error ends the attempt in `Failed`; callers
//! retry the whole call, which resumes from the parts the store already
//! holds.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cloudport_protocol::{
    CompleteUploadRequest, CreateFileRequest, InitUploadRequest, PrecheckRequest,
    PrecheckResponse,
};
use cloudport_store::ObjectStoreClient;
use cloudport_transfer::{
    ContentAddresser, Fingerprint, PartReader, SpeedEstimator, TransferError, UploadSession,
    clamp_concurrency, join_remote_path, plan, run_bounded,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::types::{UploadEvent, UploadOptions, UploadOutcome, UploadPhase};

const EVENT_BUFFER: usize = 256;

/// Progress checkpoints, in percent.
const SMALL_BEFORE_PUT: f64 = 50.0;
const SMALL_BEFORE_CONFIRM: f64 = 90.0;
const LARGE_AFTER_INIT: f64 = 5.0;
const LARGE_CHUNK_SPAN: f64 = 85.0;
const LARGE_BEFORE_COMPLETE: f64 = 95.0;
const DONE: f64 = 100.0;

/// File identity shared by the small and large paths.
struct LocalFile<'a> {
    path: &'a Path,
    name: String,
    size: u64,
    parent_path: &'a str,
    fingerprint: Fingerprint,
}

/// Uploads files to an object store.
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStoreClient>,
    addresser: ContentAddresser,
    options: UploadOptions,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    /// Creates a coordinator with the default SHA-256 fingerprinting.
    pub fn new(store: Arc<dyn ObjectStoreClient>, options: UploadOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            store,
            addresser: ContentAddresser::default(),
            options,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the fingerprinting configuration.
    pub fn with_addresser(mut self, addresser: ContentAddresser) -> Self {
        self.addresser = addresser;
        self
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped, never awaited, when the receiver lags.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns the cancellation token. Cancelling it aborts the running
    /// upload and every later one on this coordinator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `path` into the remote folder `parent_path`.
    pub async fn upload_file(
        &self,
        path: &Path,
        parent_path: &str,
    ) -> Result<UploadOutcome, UploadError> {
        self.emit(UploadEvent::Phase(UploadPhase::Idle));
        match self.run(path, parent_path).await {
            Ok(outcome) => {
                info!(
                    path = %path.display(),
                    file_id = outcome.file_id,
                    deduplicated = outcome.deduplicated,
                    uploaded_parts = outcome.uploaded_parts,
                    skipped_parts = outcome.skipped_parts,
                    "upload finished"
                );
                Ok(outcome)
            }
            Err(UploadError::Cancelled) => {
                info!(path = %path.display(), "upload cancelled");
                Err(UploadError::Cancelled)
            }
            Err(e) => {
                warn!(path = %path.display(), upload_id = ?e.upload_id(), error = %e, "upload failed");
                self.emit(UploadEvent::Phase(UploadPhase::Failed));
                Err(e)
            }
        }
    }

    async fn run(&self, path: &Path, parent_path: &str) -> Result<UploadOutcome, UploadError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                TransferError::InvalidPath(format!("no file name in {}", path.display()))
            })?;

        // 1. Hash
        self.enter(UploadPhase::Hashing)?;
        let size = tokio::fs::metadata(path).await?.len();
        let fingerprint = self.addresser.fingerprint(path).await?;
        debug!(
            path = %path.display(),
            size,
            sampled = fingerprint.sampled,
            "fingerprint ready"
        );

        let file = LocalFile {
            path,
            name,
            size,
            parent_path,
            fingerprint,
        };

        // 2. Precheck
        self.enter(UploadPhase::Precheck)?;
        let precheck = self
            .store
            .precheck(&PrecheckRequest {
                name: file.name.clone(),
                size,
                hash: file.fingerprint.token.clone(),
                parent_path: parent_path.to_string(),
            })
            .await?;

        if precheck.file_exists {
            if file.fingerprint.allows_dedup() {
                let file_id = precheck.file_id.ok_or_else(|| {
                    UploadError::ProtocolMismatch("dedup hit without a file id".into())
                })?;
                return Ok(self.deduplicated(file_id));
            }
            warn!(name = %file.name, "ignoring dedup hit for weak fingerprint");
        }

        if size < self.options.large_file_threshold {
            self.upload_small(&file, precheck).await
        } else {
            self.upload_large(&file).await
        }
    }

    /// Single PUT to the precheck write target, then confirmation.
    async fn upload_small(
        &self,
        file: &LocalFile<'_>,
        precheck: PrecheckResponse,
    ) -> Result<UploadOutcome, UploadError> {
        self.enter(UploadPhase::SmallUpload)?;
        let target = precheck.presigned_url.ok_or_else(|| {
            UploadError::ProtocolMismatch("precheck returned no write target".into())
        })?;

        let reader = PartReader::open(file.path).await?;
        if reader.file_size() != file.size {
            return Err(UploadError::Io(std::io::Error::other(format!(
                "{} changed size while uploading",
                file.path.display()
            ))));
        }
        let data = reader.read_all().await?;

        self.emit_progress(SMALL_BEFORE_PUT, 0.0, None);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            written = self.store.put_chunk(&target, data) => { written?; }
        }

        self.emit_progress(SMALL_BEFORE_CONFIRM, 0.0, None);
        self.check_cancelled()?;
        let created = self
            .store
            .confirm_small_upload(&CreateFileRequest {
                name: file.name.clone(),
                path: join_remote_path(file.parent_path, &file.name),
                size: file.size,
                hash: file.fingerprint.token.clone(),
                url: strip_query(&target).to_string(),
                is_dir: false,
                device_id: self.options.device_id.clone(),
            })
            .await?;

        self.emit(UploadEvent::Phase(UploadPhase::Done));
        self.emit_progress(DONE, 0.0, None);
        Ok(UploadOutcome {
            file_id: created.file_id,
            file_url: created.file_url,
            deduplicated: false,
            upload_id: None,
            uploaded_parts: 1,
            skipped_parts: 0,
        })
    }

    /// Multipart upload with resume from server-reported parts.
    async fn upload_large(&self, file: &LocalFile<'_>) -> Result<UploadOutcome, UploadError> {
        // 3. Init
        self.enter(UploadPhase::LargeInit)?;
        let planned = plan(file.size);
        let init = self
            .store
            .init_large_upload(&InitUploadRequest {
                name: file.name.clone(),
                size: file.size,
                hash: file.fingerprint.token.clone(),
                parent_path: file.parent_path.to_string(),
                preferred_chunk_size: self
                    .options
                    .preferred_chunk_size
                    .unwrap_or(planned.chunk_size),
                device_info: self.options.device_id.clone(),
            })
            .await
            .map_err(|source| UploadError::Init { source })?;

        if init.file_exists {
            if file.fingerprint.allows_dedup() {
                let file_id = init.file_id.ok_or_else(|| {
                    UploadError::ProtocolMismatch("dedup hit without a file id".into())
                })?;
                return Ok(self.deduplicated(file_id));
            }
            warn!(name = %file.name, "ignoring session dedup hit for weak fingerprint");
        }
        if init.upload_id.is_empty() {
            return Err(UploadError::ProtocolMismatch(
                "init returned no session token".into(),
            ));
        }

        let chunk_size = if init.optimal_chunk_size > 0 {
            init.optimal_chunk_size
        } else {
            planned.chunk_size
        };
        let concurrency = clamp_concurrency(self.options.concurrency.unwrap_or(
            if init.recommended_concurrency > 0 {
                init.recommended_concurrency as usize
            } else {
                planned.concurrency
            },
        ));

        let mut session = UploadSession::new(
            init.upload_id.clone(),
            file.fingerprint.token.clone(),
            file.size,
            chunk_size,
            concurrency,
            &init.chunk_urls,
            &init.existing_parts,
        )
        .map_err(session_error)?;
        let upload_id = session.upload_id().to_string();
        let skipped = session.satisfied_parts().len() as u32;
        let total = session.total_parts();
        debug!(
            upload_id = %upload_id,
            total_parts = total,
            skipped,
            chunk_size,
            concurrency,
            "session ready"
        );
        self.emit_progress(LARGE_AFTER_INIT, 0.0, None);

        // 4. Upload missing parts
        self.enter(UploadPhase::ChunkUpload)?;
        let reader = PartReader::open(file.path).await?;
        let pending = session.pending();
        let uploaded_parts = pending.len() as u32;

        let completed = AtomicU32::new(skipped);
        let sent_bytes = AtomicU64::new(0);
        let remaining_bytes: u64 = pending.iter().map(|c| c.len()).sum();
        let estimator = Mutex::new(SpeedEstimator::new());

        let tasks: Vec<_> = pending
            .into_iter()
            .map(|chunk| {
                let reader = &reader;
                let upload_id = upload_id.as_str();
                let completed = &completed;
                let sent_bytes = &sent_bytes;
                let estimator = &estimator;
                move || async move {
                    self.check_cancelled()?;
                    let part = chunk.part_number;
                    let target = chunk.target.as_deref().ok_or_else(|| {
                        UploadError::ProtocolMismatch(format!(
                            "session {upload_id}: part {part} has no write target"
                        ))
                    })?;
                    let data = reader.read_range(chunk.start, chunk.end).await.map_err(
                        |source| UploadError::ChunkRead {
                            upload_id: upload_id.to_string(),
                            part,
                            source,
                        },
                    )?;

                    let written = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                        written = self.store.put_chunk(target, data) => written,
                    };
                    let tag = written
                        .map_err(|source| UploadError::Chunk {
                            upload_id: upload_id.to_string(),
                            part,
                            source,
                        })?
                        .unwrap_or_else(|| format!("chunk-{part}"));

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let sent = sent_bytes.fetch_add(chunk.len(), Ordering::SeqCst) + chunk.len();
                    let (rate, eta) = {
                        let mut est = estimator.lock().unwrap_or_else(|e| e.into_inner());
                        est.observe(sent);
                        (
                            est.bytes_per_second(),
                            est.eta(remaining_bytes.saturating_sub(sent)),
                        )
                    };
                    let percent =
                        LARGE_AFTER_INIT + LARGE_CHUNK_SPAN * f64::from(done) / f64::from(total);
                    self.emit_progress(percent, rate, eta);
                    debug!(upload_id, part, done, total, "part stored");
                    Ok((part, tag))
                }
            })
            .collect();

        let tags = run_bounded(tasks, concurrency).await?;
        for (part, tag) in tags {
            session.record_tag(part, tag).map_err(session_error)?;
        }

        // 5. Complete
        if !session.is_complete() {
            return Err(UploadError::ProtocolMismatch(format!(
                "session {upload_id}: {} of {total} parts untagged",
                session.pending().len()
            )));
        }
        self.enter(UploadPhase::Completing)?;
        self.emit_progress(LARGE_BEFORE_COMPLETE, 0.0, None);
        let ordered = session.ordered_tags().map_err(session_error)?;
        let created = self
            .store
            .complete_large_upload(
                &upload_id,
                &CompleteUploadRequest {
                    uploaded_chunks: ordered,
                    file_hash: file.fingerprint.token.clone(),
                    file_name: file.name.clone(),
                    parent_path: file.parent_path.to_string(),
                    client_fingerprint: self.options.device_id.clone(),
                },
            )
            .await
            .map_err(|source| UploadError::Complete {
                upload_id: upload_id.clone(),
                source,
            })?;

        self.emit(UploadEvent::Phase(UploadPhase::Done));
        self.emit_progress(DONE, 0.0, None);
        Ok(UploadOutcome {
            file_id: created.file_id,
            file_url: created.file_url,
            deduplicated: false,
            upload_id: Some(upload_id),
            uploaded_parts,
            skipped_parts: skipped,
        })
    }

    fn deduplicated(&self, file_id: u64) -> UploadOutcome {
        debug!(file_id, "content already stored");
        self.emit(UploadEvent::Phase(UploadPhase::Deduped));
        self.emit_progress(DONE, 0.0, None);
        UploadOutcome {
            file_id,
            file_url: String::new(),
            deduplicated: true,
            upload_id: None,
            uploaded_parts: 0,
            skipped_parts: 0,
        }
    }

    /// Checks for cancellation and announces the next phase.
    fn enter(&self, phase: UploadPhase) -> Result<(), UploadError> {
        self.check_cancelled()?;
        self.emit(UploadEvent::Phase(phase));
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit_progress(&self, percent: f64, bytes_per_second: f64, eta: Option<std::time::Duration>) {
        self.emit(UploadEvent::Progress {
            percent,
            bytes_per_second,
            eta,
        });
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

fn session_error(e: TransferError) -> UploadError {
    match e {
        TransferError::ProtocolMismatch(msg) => UploadError::ProtocolMismatch(msg),
        other => UploadError::Transfer(other),
    }
}

/// Write target without its signature query string.
fn strip_query(target: &str) -> &str {
    target.split_once('?').map_or(target, |(base, _)| base)
}
