//! Error types for the Telegram front end.

use std::time::Duration;

use bililive_core::LiveError;
use teloxide::{ApiError, RequestError};
use thiserror::Error;

/// Errors that can stop the bot.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Failed to start the bot.
    #[error("Failed to start bot: {0}")]
    BotStartFailed(String),

    /// Engine or configuration error.
    #[error(transparent)]
    Live(#[from] LiveError),

    /// Telegram API request error.
    #[error("Telegram request error: {0}")]
    Request(#[from] RequestError),
}

/// Result type for Telegram operations.
pub type Result<T> = std::result::Result<T, TelegramError>;

/// Map a Telegram request failure onto the engine's error taxonomy.
pub fn classify_request_error(error: RequestError) -> LiveError {
    match error {
        RequestError::Api(ApiError::ChatNotFound) => {
            LiveError::DestinationNotFound("chat not found".to_string())
        }
        RequestError::Api(ApiError::BotBlocked) | RequestError::Api(ApiError::BotKicked) => {
            LiveError::DestinationNotFound(error.to_string())
        }
        RequestError::RetryAfter(wait) => LiveError::RateLimited(wait.duration()),
        RequestError::Network(e) => LiveError::Transport(e.to_string()),
        RequestError::Io(e) => LiveError::Transport(e.to_string()),
        other => LiveError::Other(other.to_string()),
    }
}

/// Whether a request failed for reasons worth retrying as-is.
pub fn is_transient(error: &RequestError) -> bool {
    matches!(error, RequestError::Network(_) | RequestError::Io(_))
}

/// How long to wait when Telegram asks for a slowdown, if it did.
pub fn retry_after(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::Seconds;

    #[test]
    fn test_chat_not_found_is_destination() {
        let err = classify_request_error(RequestError::Api(ApiError::ChatNotFound));
        assert!(matches!(err, LiveError::DestinationNotFound(_)));
    }

    #[test]
    fn test_retry_after_is_rate_limited() {
        let err = RequestError::RetryAfter(Seconds::from_seconds(7));
        assert_eq!(retry_after(&err), Some(Duration::from_secs(7)));
        assert!(matches!(
            classify_request_error(err),
            LiveError::RateLimited(d) if d == Duration::from_secs(7)
        ));
    }

    #[test]
    fn test_request_error_converts() {
        let err: TelegramError = RequestError::Api(ApiError::InvalidToken).into();
        assert!(matches!(err, TelegramError::Request(RequestError::Api(ApiError::InvalidToken))));
    }

    #[test]
    fn test_unknown_api_error_is_fatal() {
        let err = classify_request_error(RequestError::Api(ApiError::Unknown(
            "Bad Request: can't parse entities".to_string(),
        )));
        assert!(matches!(err, LiveError::Other(_)));
        assert!(!is_transient(&RequestError::Api(ApiError::ChatNotFound)));
    }
}
