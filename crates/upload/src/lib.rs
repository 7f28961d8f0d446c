//! Upload coordinator for the object store.
//!
//! This crate implements the **upload state machine**. It has no transport
//! dependencies of its own: callers hand it an `ObjectStoreClient`.
//!
//! # Pipeline
//!
//! 1. **Hash**: fingerprint the file (full or sampled)
//! 2. **Precheck**: ask the store whether the content already exists
//! 3. **Small upload**: single PUT plus confirmation, or
//! 4. **Large upload**: open a session, upload the missing parts through a
//!    bounded worker pool, then complete with the ordered tag list

pub mod coordinator;
pub mod error;
pub mod types;

// Re-export primary types for convenience.
pub use coordinator::UploadCoordinator;
pub use error::UploadError;
pub use types::{UploadEvent, UploadOptions, UploadOutcome, UploadPhase};
