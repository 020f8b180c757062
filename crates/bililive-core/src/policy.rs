//! Failure classification for the poll loop.
//!
//! Every per-room error is turned into exactly one [`ErrorAction`]:
//!
//! - [`ErrorAction::DisableRoom`]: the room is marked invalid and pruned at cleanup
//! - [`ErrorAction::Backoff`]: the sweep pauses, the room is retried next tick
//! - [`ErrorAction::Fatal`]: the poll loop stops and the process exits

use std::time::Duration;

use crate::error::LiveError;

/// Default pause after a transport or 5xx failure.
pub const DEFAULT_TRANSPORT_BACKOFF: Duration = Duration::from_secs(5);

/// Default pause when the chat destination is unreachable.
pub const DEFAULT_DESTINATION_BACKOFF: Duration = Duration::from_secs(30);

/// What the poll loop should do about a failed room update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Mark the room invalid; it never recovers.
    DisableRoom,
    /// Sleep for the given duration, then carry on with the sweep.
    Backoff(Duration),
    /// Stop everything.
    Fatal,
}

/// Backoff durations used when classifying errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Pause after transport errors and 5xx responses.
    pub transport_backoff: Duration,
    /// Pause after the destination chat was not found.
    pub destination_backoff: Duration,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            transport_backoff: DEFAULT_TRANSPORT_BACKOFF,
            destination_backoff: DEFAULT_DESTINATION_BACKOFF,
        }
    }
}

impl ErrorPolicy {
    /// Classify an error into the action the poll loop takes.
    pub fn classify(&self, error: &LiveError) -> ErrorAction {
        match error {
            LiveError::RoomNotFound(_) => ErrorAction::DisableRoom,
            LiveError::Transport(_) => ErrorAction::Backoff(self.transport_backoff),
            LiveError::HttpStatus { code } if (500..600).contains(code) => {
                ErrorAction::Backoff(self.transport_backoff)
            }
            LiveError::DestinationNotFound(_) => ErrorAction::Backoff(self.destination_backoff),
            LiveError::RateLimited(wait) => ErrorAction::Backoff(*wait),
            LiveError::HttpStatus { .. }
            | LiveError::RemoteProtocol { .. }
            | LiveError::Config(_)
            | LiveError::Json(_)
            | LiveError::Io(_)
            | LiveError::Other(_) => ErrorAction::Fatal,
        }
    }
}
