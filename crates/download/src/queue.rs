//! Download queue manager.
//!
//! Items move `Waiting → Downloading → {Completed | Failed | Paused}`.
//! Every state-changing call (enqueue, pause, resume, cancel, retry,
//! concurrency change, and every transfer progress or completion) runs one
//! scheduling pass under the state lock, starting the earliest waiting items
//! until the concurrency ceiling is reached. Scheduling is therefore level
//! triggered and never runs twice at once.
//!
//! Each launch bumps the item's run epoch. A transfer task only touches its
//! item while the epoch still matches and the item is still downloading, so
//! a task that outlives a pause or cancel cannot write stale bytes.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use cloudport_protocol::{DownloadRequest, DownloadResponse, FileEntry};
use cloudport_store::{ObjectStoreClient, StoreError, StoreFuture};
use cloudport_transfer::{SpeedEstimator, TransferError};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::item::{DownloadTarget, QueueConfig, QueueState, TransferItem, TransferStatus};
use crate::sink::{Artifact, ArtifactSink};
use crate::strategy::{Strategy, expand_selection, select_strategy};

type Observer = Arc<dyn Fn(&QueueState) + Send + Sync>;

/// Result of [`DownloadQueue::smart_download`].
#[derive(Debug, Clone)]
pub enum SmartDownload {
    /// Fetched directly and already written to the sink.
    SingleSmall { artifact: Artifact },
    SingleLargeQueued { ids: Vec<u64> },
    /// The store's bundle: archive name and link.
    MultiZip { bundle: DownloadResponse },
    MultiQueued { ids: Vec<u64> },
}

impl SmartDownload {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::SingleSmall { .. } => Strategy::SingleSmall,
            Self::SingleLargeQueued { .. } => Strategy::SingleLargeQueued,
            Self::MultiZip { .. } => Strategy::MultiZip,
            Self::MultiQueued { .. } => Strategy::MultiQueued,
        }
    }

    /// Queue ids created, if any.
    pub fn queued_ids(&self) -> &[u64] {
        match self {
            Self::SingleLargeQueued { ids } | Self::MultiQueued { ids } => ids,
            _ => &[],
        }
    }
}

/// Handle returned by [`DownloadQueue::subscribe`].
#[must_use = "dropping the handle keeps the observer registered"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Stops further callbacks.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .observers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .list
                .retain(|(id, _)| *id != self.id);
        }
    }
}

struct Entry {
    id: u64,
    file_id: u64,
    name: String,
    total_size: u64,
    status: TransferStatus,
    /// Bytes received so far. Its length is the resume offset.
    buffer: Vec<u8>,
    /// Bytes received, kept after the buffer is handed to the sink.
    received: u64,
    error: Option<String>,
    speed: SpeedEstimator,
    cancel: Option<CancellationToken>,
    epoch: u64,
    launched: u64,
}

impl Entry {
    fn snapshot(&self) -> TransferItem {
        let downloading = self.status == TransferStatus::Downloading;
        TransferItem {
            id: self.id,
            file_id: self.file_id,
            name: self.name.clone(),
            total_size: self.total_size,
            downloaded_bytes: self.received,
            status: self.status,
            bytes_per_second: if downloading {
                self.speed.bytes_per_second()
            } else {
                0.0
            },
            eta: if downloading && self.total_size > 0 {
                self.speed
                    .eta(self.total_size.saturating_sub(self.received))
            } else {
                None
            },
            error: self.error.clone(),
        }
    }

    fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    fn reset_buffer(&mut self) {
        self.buffer = Vec::new();
        self.received = 0;
    }
}

/// Work handed to a transfer task.
struct Job {
    id: u64,
    epoch: u64,
    file_id: u64,
    name: String,
    offset: u64,
    token: CancellationToken,
}

struct State {
    entries: Vec<Entry>,
    next_id: u64,
    max_concurrent: usize,
    revision: u64,
    launches: u64,
}

impl State {
    fn active(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == TransferStatus::Downloading)
            .count()
    }

    fn entry_mut(&mut self, id: u64) -> Result<&mut Entry, DownloadError> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(DownloadError::UnknownItem(id))
    }

    /// The entry a job belongs to, while that job is still current.
    fn running_mut(&mut self, job: &Job) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| {
            e.id == job.id && e.epoch == job.epoch && e.status == TransferStatus::Downloading
        })
    }

    /// Starts the earliest waiting items until the ceiling is reached.
    fn schedule(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while self.active() < self.max_concurrent {
            let Some(idx) = self
                .entries
                .iter()
                .position(|e| e.status == TransferStatus::Waiting)
            else {
                break;
            };
            self.launches += 1;
            let launched = self.launches;

            let entry = &mut self.entries[idx];
            let token = CancellationToken::new();
            entry.status = TransferStatus::Downloading;
            entry.epoch += 1;
            entry.launched = launched;
            entry.error = None;
            entry.received = entry.buffer.len() as u64;
            entry.speed.reset();
            entry.cancel = Some(token.clone());
            debug!(item = entry.id, offset = entry.received, "download started");

            jobs.push(Job {
                id: entry.id,
                epoch: entry.epoch,
                file_id: entry.file_id,
                name: entry.name.clone(),
                offset: entry.received,
                token,
            });
        }
        jobs
    }

    fn snapshot(&self) -> QueueState {
        QueueState {
            revision: self.revision,
            items: self.entries.iter().map(Entry::snapshot).collect(),
            active_downloads: self.active(),
            max_concurrent: self.max_concurrent,
        }
    }
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<(u64, Observer)>,
}

struct Shared {
    store: Arc<dyn ObjectStoreClient>,
    sink: Arc<dyn ArtifactSink>,
    config: QueueConfig,
    state: Mutex<State>,
    observers: Mutex<Observers>,
    snapshots: watch::Sender<QueueState>,
}

/// FIFO download queue with a concurrency ceiling.
///
/// Cheap to clone; clones share the same queue. Methods that change state
/// spawn transfer tasks and must be called inside a Tokio runtime.
#[derive(Clone)]
pub struct DownloadQueue {
    shared: Arc<Shared>,
}

impl DownloadQueue {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        sink: Arc<dyn ArtifactSink>,
        config: QueueConfig,
    ) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let state = State {
            entries: Vec::new(),
            next_id: 0,
            max_concurrent,
            revision: 0,
            launches: 0,
        };
        let (snapshots, _) = watch::channel(state.snapshot());
        Self {
            shared: Arc::new(Shared {
                store,
                sink,
                config,
                state: Mutex::new(state),
                observers: Mutex::new(Observers::default()),
                snapshots,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `f`, runs a scheduling pass, and publishes the new state.
    fn update<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let (result, jobs, snapshot) = {
            let mut state = self.lock();
            let result = f(&mut state);
            let jobs = state.schedule();
            state.revision += 1;
            (result, jobs, state.snapshot())
        };
        for job in jobs {
            let queue = self.clone();
            tokio::spawn(async move { queue.run(job).await });
        }
        self.publish(snapshot);
        result
    }

    fn publish(&self, snapshot: QueueState) {
        let observers: Vec<Observer> = self
            .shared
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .list
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            observer(&snapshot);
        }
        self.shared.snapshots.send_if_modified(|current| {
            if snapshot.revision > current.revision {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }

    // -----------------------------------------------------------------------
    // Queue operations
    // -----------------------------------------------------------------------

    /// Appends files to the queue. Returns their item ids in order.
    pub fn enqueue(&self, targets: Vec<DownloadTarget>) -> Vec<u64> {
        self.update(|state| {
            targets
                .into_iter()
                .map(|target| {
                    state.next_id += 1;
                    let id = state.next_id;
                    debug!(item = id, file_id = target.file_id, name = %target.name, "queued");
                    state.entries.push(Entry {
                        id,
                        file_id: target.file_id,
                        name: target.name,
                        total_size: target.size,
                        status: TransferStatus::Waiting,
                        buffer: Vec::new(),
                        received: 0,
                        error: None,
                        speed: SpeedEstimator::new(),
                        cancel: None,
                        epoch: 0,
                        launched: 0,
                    });
                    id
                })
                .collect()
        })
    }

    /// Parks a waiting or downloading item, keeping its bytes.
    pub fn pause(&self, id: u64) -> Result<(), DownloadError> {
        self.update(|state| {
            let entry = state.entry_mut(id)?;
            match entry.status {
                TransferStatus::Waiting | TransferStatus::Downloading => {
                    entry.stop();
                    entry.status = TransferStatus::Paused;
                    debug!(item = id, offset = entry.buffer.len(), "paused");
                    Ok(())
                }
                from => Err(DownloadError::InvalidTransition {
                    id,
                    from,
                    action: "pause",
                }),
            }
        })
    }

    /// Pauses everything waiting or downloading. Returns how many items
    /// were parked.
    pub fn pause_all(&self) -> usize {
        self.update(|state| {
            let mut parked = 0;
            for entry in &mut state.entries {
                if matches!(
                    entry.status,
                    TransferStatus::Waiting | TransferStatus::Downloading
                ) {
                    entry.stop();
                    entry.status = TransferStatus::Paused;
                    parked += 1;
                }
            }
            parked
        })
    }

    /// Requeues a paused item. It restarts from its recorded offset.
    pub fn resume(&self, id: u64) -> Result<(), DownloadError> {
        self.update(|state| {
            let entry = state.entry_mut(id)?;
            if entry.status != TransferStatus::Paused {
                return Err(DownloadError::InvalidTransition {
                    id,
                    from: entry.status,
                    action: "resume",
                });
            }
            entry.status = TransferStatus::Waiting;
            debug!(item = id, offset = entry.buffer.len(), "resumed");
            Ok(())
        })
    }

    /// Requeues a failed item. Bytes received before the failure are kept
    /// and the transfer continues from there.
    pub fn retry(&self, id: u64) -> Result<(), DownloadError> {
        self.update(|state| {
            let entry = state.entry_mut(id)?;
            if entry.status != TransferStatus::Failed {
                return Err(DownloadError::InvalidTransition {
                    id,
                    from: entry.status,
                    action: "retry",
                });
            }
            entry.status = TransferStatus::Waiting;
            entry.error = None;
            debug!(item = id, offset = entry.buffer.len(), "retrying");
            Ok(())
        })
    }

    /// Stops an item and removes it from the queue.
    pub fn cancel(&self, id: u64) -> Result<(), DownloadError> {
        self.update(|state| {
            let idx = state
                .entries
                .iter()
                .position(|e| e.id == id)
                .ok_or(DownloadError::UnknownItem(id))?;
            let mut entry = state.entries.remove(idx);
            entry.stop();
            debug!(item = id, status = %entry.status, "cancelled");
            Ok(())
        })
    }

    /// Removes completed and failed items. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        self.update(|state| {
            let before = state.entries.len();
            state.entries.retain(|e| !e.status.is_finished());
            before - state.entries.len()
        })
    }

    /// Changes the concurrency ceiling.
    ///
    /// Lowering it below the number of running downloads sends the most
    /// recently started ones back to `Waiting`; they resume from their
    /// offsets when a slot frees up.
    pub fn set_max_concurrent(&self, max: usize) {
        let max = max.max(1);
        self.update(|state| {
            state.max_concurrent = max;
            let mut running: Vec<&mut Entry> = state
                .entries
                .iter_mut()
                .filter(|e| e.status == TransferStatus::Downloading)
                .collect();
            if running.len() <= max {
                return;
            }
            running.sort_by_key(|e| std::cmp::Reverse(e.launched));
            let excess = running.len() - max;
            for entry in running.into_iter().take(excess) {
                entry.stop();
                entry.status = TransferStatus::Waiting;
                debug!(item = entry.id, offset = entry.buffer.len(), "requeued by limit change");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Current state.
    pub fn snapshot(&self) -> QueueState {
        self.lock().snapshot()
    }

    /// Watch channel carrying the latest snapshot.
    pub fn snapshots(&self) -> watch::Receiver<QueueState> {
        self.shared.snapshots.subscribe()
    }

    /// Registers a callback invoked with every new snapshot.
    ///
    /// Callbacks may run on transfer tasks concurrently; use
    /// [`QueueState::revision`] to discard stale snapshots.
    pub fn subscribe(&self, observer: impl Fn(&QueueState) + Send + Sync + 'static) -> Subscription {
        let mut observers = self
            .shared
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        observers.next_id += 1;
        let id = observers.next_id;
        observers.list.push((id, Arc::new(observer)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Waits until nothing is waiting or downloading.
    pub async fn wait_idle(&self) -> QueueState {
        let mut rx = self.snapshots();
        match rx.wait_for(QueueState::is_idle).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    // -----------------------------------------------------------------------
    // Strategy
    // -----------------------------------------------------------------------

    /// Expands `selection`, picks a strategy, and starts it.
    pub async fn smart_download(
        &self,
        selection: &[FileEntry],
    ) -> Result<SmartDownload, DownloadError> {
        let config = &self.shared.config;
        let files =
            expand_selection(self.shared.store.as_ref(), selection, &config.expansion).await?;
        let strategy = select_strategy(&files, config.large_file_threshold)
            .ok_or(DownloadError::EmptySelection)?;
        info!(
            files = files.len(),
            total_size = files.iter().map(|f| f.size).sum::<u64>(),
            ?strategy,
            "download strategy chosen"
        );

        let targets = || files.iter().map(DownloadTarget::from).collect();
        match strategy {
            Strategy::SingleSmall => {
                let artifact = self.fetch_direct(&files[0]).await?;
                Ok(SmartDownload::SingleSmall { artifact })
            }
            Strategy::SingleLargeQueued => Ok(SmartDownload::SingleLargeQueued {
                ids: self.enqueue(targets()),
            }),
            Strategy::MultiZip => {
                let bundle = self
                    .shared
                    .store
                    .request_bundle(&DownloadRequest {
                        file_ids: files.iter().map(|f| f.id).collect(),
                        zip_name: None,
                    })
                    .await?;
                Ok(SmartDownload::MultiZip { bundle })
            }
            Strategy::MultiQueued => Ok(SmartDownload::MultiQueued {
                ids: self.enqueue(targets()),
            }),
        }
    }

    /// One unqueued transfer straight into the sink.
    async fn fetch_direct(&self, file: &FileEntry) -> Result<Artifact, DownloadError> {
        let stream = self.shared.store.stream_download(file.id, None, None).await?;
        if let Some(total) = stream.total_size
            && total != file.size
        {
            return Err(size_mismatch(file, total));
        }

        // The listing size is the only bound; never trust the stream's.
        let capacity = file.size.min(self.shared.config.large_file_threshold);
        let mut data = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
        let mut body = stream.body;
        while let Some(segment) = body.next().await {
            let segment = segment?;
            let len = data.len() as u64 + segment.len() as u64;
            if len > file.size {
                return Err(size_mismatch(file, len));
            }
            data.extend_from_slice(&segment);
        }
        if data.len() as u64 != file.size {
            return Err(size_mismatch(file, data.len() as u64));
        }
        self.shared.sink.write(&file.name, Bytes::from(data)).await
    }

    // -----------------------------------------------------------------------
    // Transfer task
    // -----------------------------------------------------------------------

    async fn run(self, job: Job) {
        match self.transfer(&job).await {
            Ok(data) => self.finish(&job, data).await,
            Err(DownloadError::Cancelled) => {
                debug!(item = job.id, "transfer stopped");
            }
            Err(e) => self.fail(&job, e),
        }
    }

    /// Applies `f` to the job's entry if the job is still current.
    fn with_running<R>(
        &self,
        job: &Job,
        f: impl FnOnce(&mut Entry) -> R,
    ) -> Result<R, DownloadError> {
        self.update(|state| state.running_mut(job).map(f).ok_or(DownloadError::Cancelled))
    }

    async fn transfer(&self, job: &Job) -> Result<Bytes, DownloadError> {
        let store = &self.shared.store;
        let mut offset = job.offset;

        if offset > 0 {
            // Parked after the last byte arrived: nothing left to request.
            let complete = self.with_running(job, |e| {
                let whole = e.received == e.total_size && e.buffer.len() as u64 == e.received;
                (e.total_size > 0 && whole)
                    .then(|| Bytes::from(std::mem::take(&mut e.buffer)))
            })?;
            if let Some(data) = complete {
                debug!(item = job.id, offset, "already fully buffered");
                return Ok(data);
            }

            let info = race(&job.token, store.download_info(job.file_id)).await?;
            if offset >= info.total_size {
                return Err(DownloadError::ResumeInvalid {
                    offset,
                    total: info.total_size,
                });
            }
            if !info.accept_ranges {
                debug!(item = job.id, offset, "ranges unsupported, restarting from zero");
                self.with_running(job, Entry::reset_buffer)?;
                offset = 0;
            }
        }

        let start = (offset > 0).then_some(offset);
        let stream = race(&job.token, store.stream_download(job.file_id, start, None)).await?;
        if stream.offset != offset {
            if stream.offset != 0 {
                return Err(DownloadError::Transfer(TransferError::ProtocolMismatch(
                    format!("asked for byte {offset}, stream starts at {}", stream.offset),
                )));
            }
            debug!(item = job.id, offset, "range ignored, restarting from zero");
            self.with_running(job, Entry::reset_buffer)?;
        }
        if let Some(total) = stream.total_size {
            self.with_running(job, |e| e.total_size = total)?;
        }
        debug!(item = job.id, offset = stream.offset, "streaming");

        let mut body = stream.body;
        loop {
            let next = tokio::select! {
                biased;
                _ = job.token.cancelled() => return Err(DownloadError::Cancelled),
                next = body.next() => next,
            };
            match next {
                Some(Ok(segment)) => {
                    self.with_running(job, |e| {
                        e.buffer.extend_from_slice(&segment);
                        e.received = e.buffer.len() as u64;
                        e.speed.observe(e.received);
                    })?;
                    if job.token.is_cancelled() {
                        return Err(DownloadError::Cancelled);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        self.with_running(job, |e| {
            let len = e.buffer.len() as u64;
            if e.total_size > 0 && len != e.total_size {
                return Err(DownloadError::Transfer(TransferError::ProtocolMismatch(
                    format!("received {len} of {} bytes", e.total_size),
                )));
            }
            Ok(Bytes::from(std::mem::take(&mut e.buffer)))
        })?
    }

    async fn finish(&self, job: &Job, data: Bytes) {
        let written = tokio::select! {
            biased;
            _ = job.token.cancelled() => Err(DownloadError::Cancelled),
            written = self.shared.sink.write(&job.name, data.clone()) => written,
        };
        match written {
            Ok(artifact) => {
                let done = self.with_running(job, |e| {
                    e.status = TransferStatus::Completed;
                    e.cancel = None;
                });
                if done.is_ok() {
                    info!(item = job.id, name = %artifact.name, size = artifact.size, "download complete");
                }
            }
            Err(DownloadError::Cancelled) => {
                debug!(item = job.id, "stopped before the artifact was written");
                self.restore_buffer(job, data);
            }
            // The buffer is already gone, so a retry starts over.
            Err(e) => self.fail_with(job, e, true),
        }
    }

    /// Hands the assembled bytes back to a parked item so it can resume.
    fn restore_buffer(&self, job: &Job, data: Bytes) {
        self.update(|state| {
            if let Some(e) = state
                .entries
                .iter_mut()
                .find(|e| e.id == job.id && e.epoch == job.epoch && e.buffer.is_empty())
            {
                e.buffer = data.to_vec();
                e.received = e.buffer.len() as u64;
            }
        });
    }

    fn fail(&self, job: &Job, err: DownloadError) {
        let restart = matches!(
            err,
            DownloadError::ResumeInvalid { .. }
                | DownloadError::Transfer(TransferError::ProtocolMismatch(_))
        );
        self.fail_with(job, err, restart);
    }

    fn fail_with(&self, job: &Job, err: DownloadError, restart: bool) {
        let message = err.to_string();
        let failed = self.with_running(job, |e| {
            e.status = TransferStatus::Failed;
            e.error = Some(message.clone());
            e.cancel = None;
            if restart {
                e.reset_buffer();
            }
        });
        if failed.is_ok() {
            warn!(item = job.id, error = %message, restart, "download failed");
        }
    }

    #[cfg(test)]
    fn buffered_bytes(&self) -> usize {
        self.lock().entries.iter().map(|e| e.buffer.len()).sum()
    }
}

fn size_mismatch(file: &FileEntry, got: u64) -> DownloadError {
    DownloadError::Transfer(TransferError::ProtocolMismatch(format!(
        "{}: listed as {} bytes, stream has {got}",
        file.name, file.size
    )))
}

/// Races a store call against cancellation.
async fn race<T>(token: &CancellationToken, call: StoreFuture<'_, T>) -> Result<T, DownloadError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DownloadError::Cancelled),
        result = call => result.map_err(|e: StoreError| e.into()),
    }
}
