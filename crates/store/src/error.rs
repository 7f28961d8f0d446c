//! Store error types.

use cloudport_protocol::EnvelopeError;

/// Errors produced by object-store clients.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The credential was rejected.
    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },

    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },

    /// The store answered with an unexpected shape.
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<EnvelopeError> for StoreError {
    fn from(e: EnvelopeError) -> Self {
        Self::Api {
            code: e.code,
            message: e.message,
        }
    }
}
