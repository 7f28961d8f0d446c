//! Collaborators of the transfer engine: bearer-token auth and the object
//! store API.
//!
//! Upload and download logic only ever sees the [`AuthProvider`] and
//! [`ObjectStoreClient`] traits. [`HttpStoreClient`] speaks the HTTP API;
//! [`MemoryStore`] keeps everything in process for tests and offline use.

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod memory;

// Re-export primary types for convenience.
pub use auth::{AuthProvider, TokenAuth};
pub use client::{ByteStream, DownloadStream, ObjectStoreClient, StoreFuture};
pub use error::StoreError;
pub use http::HttpStoreClient;
pub use memory::{MemoryStore, StoreCall};
