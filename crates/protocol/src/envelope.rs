use serde::{Deserialize, Serialize};

use crate::constants::SUCCESS_CODE;

/// Business-level failure reported inside an otherwise successful response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("api error {code}: {message}")]
pub struct EnvelopeError {
    pub code: i32,
    pub message: String,
}

/// Envelope wrapping every API response body.
///
/// `data` is absent on most failures and on some successful calls that
/// return nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Wraps a successful payload.
    pub fn ok(data: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            msg: "success".into(),
            data: Some(data),
        }
    }

    /// Builds a failure envelope with no payload.
    pub fn failure(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }

    /// Returns `true` if the envelope carries the success code.
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Unwraps the payload, turning a non-success code into an error.
    ///
    /// A success envelope without `data` yields `Ok(None)`.
    pub fn into_result(self) -> Result<Option<T>, EnvelopeError> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(EnvelopeError {
                code: self.code,
                message: if self.msg.is_empty() {
                    "request failed".into()
                } else {
                    self.msg
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::FileCreated;

    #[test]
    fn success_envelope_yields_data() {
        let json = r#"{"code":20000,"msg":"ok","data":{"fileId":7,"fileUrl":"http://s/7"}}"#;
        let env: ApiEnvelope<FileCreated> = serde_json::from_str(json).unwrap();
        assert!(env.is_success());
        let data = env.into_result().unwrap().unwrap();
        assert_eq!(data.file_id, 7);
        assert_eq!(data.file_url, "http://s/7");
    }

    #[test]
    fn failure_envelope_yields_error() {
        let json = r#"{"code":40001,"msg":"quota exceeded"}"#;
        let env: ApiEnvelope<FileCreated> = serde_json::from_str(json).unwrap();
        let err = env.into_result().unwrap_err();
        assert_eq!(err.code, 40001);
        assert_eq!(err.message, "quota exceeded");
    }

    #[test]
    fn failure_without_message_gets_placeholder() {
        let env: ApiEnvelope<()> = ApiEnvelope::failure(50000, "");
        let err = env.into_result().unwrap_err();
        assert_eq!(err.message, "request failed");
    }

    #[test]
    fn success_without_data_is_none() {
        let json = r#"{"code":20000,"msg":"ok"}"#;
        let env: ApiEnvelope<FileCreated> = serde_json::from_str(json).unwrap();
        assert!(env.into_result().unwrap().is_none());
    }

    #[test]
    fn ok_envelope_omits_missing_data() {
        let env: ApiEnvelope<u32> = ApiEnvelope::failure(1, "x");
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("data"));
    }
}
