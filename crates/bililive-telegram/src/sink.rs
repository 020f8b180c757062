//! Telegram implementation of the notification sink.

use async_trait::async_trait;
use bililive_core::{NotificationSink, Result, RoomRecord};
use chrono_tz::Tz;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

use crate::error::classify_request_error;
use crate::render::notification_text;

/// Posts session announcements to a single chat.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
    timezone: Tz,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat_id: ChatId, timezone: Tz) -> Self {
        Self {
            bot,
            chat_id,
            timezone,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Edit an existing announcement.
    async fn edit(&self, handle: MessageId, record: &RoomRecord<MessageId>) -> Result<EditOutcome> {
        let result = self
            .bot
            .edit_message_text(self.chat_id, handle, notification_text(record, self.timezone))
            .parse_mode(ParseMode::MarkdownV2)
            .link_preview_options(cover_preview(record))
            .await;

        let outcome = edit_outcome(result)?;
        debug!(room_id = %record.room_id, outcome = ?outcome, "Live message edited");
        Ok(outcome)
    }
}

/// What an edit request did to the announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The message shows the new text, or already did.
    Edited,
    /// The message no longer exists.
    Missing,
}

/// Map the result of an edit request.
///
/// "Message is not modified" counts as edited; other failures go through
/// [`classify_request_error`].
pub fn edit_outcome<T>(result: std::result::Result<T, RequestError>) -> Result<EditOutcome> {
    match result {
        Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(EditOutcome::Edited),
        Err(RequestError::Api(ApiError::MessageToEditNotFound)) => Ok(EditOutcome::Missing),
        Err(e) => Err(classify_request_error(e)),
    }
}

/// Large cover preview shown above the announcement.
fn cover_preview<H>(record: &RoomRecord<H>) -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: false,
        url: record.cover_url.clone(),
        prefer_small_media: false,
        prefer_large_media: true,
        show_above_text: true,
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    type Handle = MessageId;

    async fn send_start(&self, record: &RoomRecord<MessageId>) -> Result<MessageId> {
        let sent = self
            .bot
            .send_message(self.chat_id, notification_text(record, self.timezone))
            .parse_mode(ParseMode::MarkdownV2)
            .link_preview_options(cover_preview(record))
            .await
            .map_err(classify_request_error)?;

        info!(room_id = %record.room_id, message_id = sent.id.0, "Live start message sent");
        Ok(sent.id)
    }

    async fn edit_in_place(
        &self,
        handle: &MessageId,
        record: &RoomRecord<MessageId>,
    ) -> Result<MessageId> {
        if self.edit(*handle, record).await? == EditOutcome::Edited {
            return Ok(*handle);
        }
        warn!(
            room_id = %record.room_id,
            message_id = handle.0,
            "Live message was deleted, sending a new one"
        );
        self.send_start(record).await
    }

    async fn mark_ended(&self, handle: &MessageId, record: &RoomRecord<MessageId>) -> Result<()> {
        if self.edit(*handle, record).await? == EditOutcome::Missing {
            warn!(
                room_id = %record.room_id,
                message_id = handle.0,
                "Live message was deleted, nothing to mark as ended"
            );
        }
        Ok(())
    }

    async fn send_warning(&self, text: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, format!("Warning: {}", text))
            .await
            .map_err(classify_request_error)?;
        Ok(())
    }
}
