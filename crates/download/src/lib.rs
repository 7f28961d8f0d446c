//! Download side of the transfer engine.
//!
//! - [`DownloadQueue`]: FIFO queue with a concurrency ceiling. Items stream
//!   into a per-item buffer and can be paused, resumed from the exact byte
//!   offset, retried, or cancelled. State changes are published as
//!   immutable [`QueueState`] snapshots.
//! - [`strategy`]: expands a mixed file/folder selection and decides
//!   between a direct transfer, a server-side bundle, or the queue.
//! - [`sink`]: where finished downloads are written.

pub mod error;
pub mod item;
pub mod queue;
pub mod sink;
pub mod strategy;

// Re-export primary types for convenience.
pub use error::DownloadError;
pub use item::{DownloadTarget, QueueConfig, QueueState, TransferItem, TransferStatus};
pub use queue::{DownloadQueue, SmartDownload, Subscription};
pub use sink::{Artifact, ArtifactSink, DirectorySink, MemorySink, SinkFuture};
pub use strategy::{ExpansionConfig, Strategy, expand_selection, select_strategy};
