//! Error types shared by every component of the client.

use serde_json::Value;
use thiserror::Error;

/// Failure of a single call against the chat backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response (connection refused, DNS, TLS...).
    #[error("network error: {0}")]
    Network(String),

    /// The response arrived but its body could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Builds an [`ApiError::Http`] from a status and the raw response body,
    /// pulling the human-readable text out of the usual JSON error envelopes.
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            message: extract_error_message(body),
        }
    }

    /// True for the "requested model is not available" family of failures.
    ///
    /// The backend has no error codes for this, only message text, so the
    /// check is a substring match.
    pub fn is_model_not_found(&self) -> bool {
        let Self::Http { status, message } = self else {
            return false;
        };
        if *status != 400 && *status != 404 {
            return false;
        }
        let message = message.to_lowercase();
        message.contains("model") && (message.contains("not found") || message.contains("not exist"))
    }

    /// True when a 422 complains that the request body is missing, which is
    /// how the sign-in endpoint rejects a body encoding it does not accept.
    pub fn is_missing_body(&self) -> bool {
        let Self::Http { status, message } = self else {
            return false;
        };
        let message = message.to_lowercase();
        *status == 422 && (message.contains("missing") || message.contains("field required"))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Pulls the message text out of a backend error body.
fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };

    let candidates = [
        value.get("detail"),
        value.get("error").and_then(|e| e.get("message")),
        value.get("message"),
        value.get("error"),
    ];

    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            Value::Object(_) => None,
            other => Some(other.to_string()),
        })
        .unwrap_or_else(|| body.trim().to_string());
    message
}

/// Top-level error for the client library.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("backend error: {0}")]
    Api(#[from] ApiError),

    #[error("storage error for '{key}': {message}")]
    Storage { key: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not permitted: {0}")]
    Forbidden(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ParleyError>;
