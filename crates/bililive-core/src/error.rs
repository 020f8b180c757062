//! Error types for the reconciliation core.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while fetching room state or delivering notifications.
///
/// How each variant is handled by the poll loop is decided by
/// [`ErrorPolicy`](crate::policy::ErrorPolicy).
#[derive(Debug, Error)]
pub enum LiveError {
    /// Room id unknown upstream, or explicitly invalid.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Network-level failure reaching the upstream or the chat service.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx HTTP response from the upstream.
    #[error("HTTP status {code}")]
    HttpStatus { code: u16 },

    /// The upstream answered, but its application status signals a broken contract.
    #[error("upstream protocol error (code {code}): {message}")]
    RemoteProtocol { code: i64, message: String },

    /// The configured notification destination cannot be reached.
    #[error("notification destination not found: {0}")]
    DestinationNotFound(String),

    /// The chat service asked us to wait before the next request.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything we do not know how to recover from.
    #[error("{0}")]
    Other(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, LiveError>;

impl From<reqwest::Error> for LiveError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            LiveError::HttpStatus {
                code: status.as_u16(),
            }
        } else if e.is_decode() {
            LiveError::RemoteProtocol {
                code: -1,
                message: e.to_string(),
            }
        } else {
            LiveError::Transport(e.to_string())
        }
    }
}
