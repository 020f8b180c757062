//! Telegram front end for Bilibili live notifications.
//!
//! Announces live sessions of subscribed rooms in one chat, keeps a single
//! message per session up to date, and answers management commands.
//!
//! # Configuration
//!
//! Each key is read from `BILILIVENOTIBOT_<KEY>` first, then from the JSON
//! config file:
//! - `tgbot_token`: Bot token from @BotFather (required)
//! - `tg_chat_id`: Chat to post into and accept commands from (required)
//! - `timezone`: IANA zone for displayed times (default: Asia/Shanghai)
//! - `poll_interval`: Seconds between sweeps (default: 60)
//! - `subscribed_rooms`: Rooms watched at startup
//!
//! # Commands
//!
//! - `/start` - Show help
//! - `/list` - List subscribed rooms
//! - `/subscribe <room_id>` - Watch a room
//! - `/unsubscribe <room_id>` - Stop watching a room
//! - `/interval [seconds]` - Show or change the poll interval
//! - `/echo [text]` - Liveness check
//! - `/frame <room_id>` - Current key frame of a room

pub mod bot;
pub mod error;
pub mod handlers;
pub mod render;
pub mod sink;

pub use bot::LiveNotifyBot;
pub use error::{classify_request_error, Result, TelegramError};
pub use handlers::{Command, TelegramEngine};
pub use sink::TelegramSink;
