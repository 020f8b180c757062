//! Notification sink interface.
//!
//! The engine never formats or delivers messages itself; it hands the record
//! to a sink and keeps whatever opaque handle the sink returns.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::Result;
use crate::record::RoomRecord;

/// Outbound messaging capability used for session notifications.
///
/// Errors should be mapped onto [`LiveError`](crate::error::LiveError) so the
/// engine can classify them: `Transport` and `RateLimited` for retryable
/// delivery problems, `DestinationNotFound` when the chat is unreachable.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Opaque identifier of a delivered message.
    type Handle: Clone + Debug + PartialEq + Send + Sync;

    /// Announce a new live session.
    async fn send_start(&self, record: &RoomRecord<Self::Handle>) -> Result<Self::Handle>;

    /// Rewrite an announcement with refreshed room data.
    ///
    /// May return a different handle if the original message had to be replaced.
    async fn edit_in_place(
        &self,
        handle: &Self::Handle,
        record: &RoomRecord<Self::Handle>,
    ) -> Result<Self::Handle>;

    /// Rewrite an announcement as finished, with stop time and duration.
    async fn mark_ended(&self, handle: &Self::Handle, record: &RoomRecord<Self::Handle>)
        -> Result<()>;

    /// Send a free-form warning, e.g. that a room was disabled.
    async fn send_warning(&self, text: &str) -> Result<()>;
}
