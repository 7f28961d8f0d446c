//! Bearer credential provider.
//!
//! The transfer engine never stores or validates credentials; it asks an
//! [`AuthProvider`] for headers and reports auth failures back to it.

use std::sync::RwLock;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, warn};

/// Supplies credentials for store API calls.
pub trait AuthProvider: Send + Sync {
    /// Current bearer token, if any.
    fn current_credential(&self) -> Option<String>;

    /// Headers to attach to every authenticated API request.
    fn auth_headers(&self) -> HeaderMap;

    /// Whether an HTTP status means the credential was rejected.
    fn is_auth_error(&self, status: u16) -> bool {
        matches!(status, 401 | 403)
    }

    /// Receives a refreshed token returned by the store.
    fn refresh_token(&self, _token: &str) {}
}

/// In-memory bearer token holder.
#[derive(Debug, Default)]
pub struct TokenAuth {
    token: RwLock<Option<String>>,
}

impl TokenAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.is_empty())),
        }
    }

    /// Drops the stored token.
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl AuthProvider for TokenAuth {
    fn current_credential(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.current_credential() {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("stored token is not a valid header value, sending unauthenticated"),
            }
        }
        headers
    }

    fn refresh_token(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        debug!("access token refreshed by store");
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
    }
}
