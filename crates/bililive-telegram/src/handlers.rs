//! Command handlers for the Telegram bot.
//!
//! Reply texts are built by engine-generic functions so they can be exercised
//! without a Telegram connection; `handle_command` only sends them.

use std::sync::Arc;

use bililive_core::{is_valid_room_id, NotificationSink, ReconciliationEngine};
use chrono_tz::Tz;
use teloxide::prelude::*;
use teloxide::types::{InputFile, LinkPreviewOptions, ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::render::room_list_text;
use crate::sink::TelegramSink;

/// Engine driving the Telegram sink.
pub type TelegramEngine = ReconciliationEngine<TelegramSink>;

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot and show help")]
    Start,

    #[command(description = "List subscribed rooms and their recorded state")]
    List,

    #[command(description = "Subscribe a room: /subscribe <room_id>")]
    Subscribe(String),

    #[command(description = "Unsubscribe a room: /unsubscribe <room_id>")]
    Unsubscribe(String),

    #[command(description = "Show or change the poll interval: /interval [seconds]")]
    Interval(String),

    #[command(description = "Check that the bot is alive")]
    Echo(String),

    #[command(description = "Show the live key frame of a room: /frame <room_id>")]
    Frame(String),
}

/// Greeting for `/start`.
pub fn start_reply() -> String {
    format!(
        "Bilibili live notification bot is running.\n\n{}",
        Command::descriptions()
    )
}

/// Reply for `/subscribe`.
pub async fn subscribe_reply<S: NotificationSink>(
    engine: &ReconciliationEngine<S>,
    argument: &str,
) -> String {
    let room_id = argument.trim();
    if !is_valid_room_id(room_id) {
        return "Please give a valid room id".to_string();
    }
    if engine.subscribe(&[room_id.to_string()]).await.is_empty() {
        format!("Room {} is already subscribed", room_id)
    } else {
        format!("Subscribed room {}", room_id)
    }
}

/// Reply for `/unsubscribe`.
pub async fn unsubscribe_reply<S: NotificationSink>(
    engine: &ReconciliationEngine<S>,
    argument: &str,
) -> String {
    let room_id = argument.trim();
    if !is_valid_room_id(room_id) {
        return "Please give a valid room id".to_string();
    }
    if engine.unsubscribe(&[room_id.to_string()]).await.is_empty() {
        format!("Room {} is not subscribed", room_id)
    } else {
        format!("Unsubscribed room {}", room_id)
    }
}

/// Reply for `/interval`.
pub fn interval_reply<S: NotificationSink>(engine: &ReconciliationEngine<S>, argument: &str) -> String {
    let argument = argument.trim();
    let current = engine.poll_interval();
    if argument.is_empty() {
        return format!("Current poll interval is {}s", current);
    }

    let requested = match argument.parse::<u64>() {
        Ok(secs) if secs > 0 && argument.bytes().all(|b| b.is_ascii_digit()) => secs,
        _ => return "Please give a valid poll interval".to_string(),
    };
    if requested == current {
        return "Poll interval unchanged".to_string();
    }
    match engine.set_poll_interval(requested) {
        Ok(previous) => format!("Poll interval changed: {}s ==> {}s", previous, requested),
        Err(_) => "Please give a valid poll interval".to_string(),
    }
}

/// Reply for `/echo`.
pub fn echo_reply(argument: &str) -> String {
    if argument.is_empty() {
        "Bot is running".to_string()
    } else {
        argument.to_string()
    }
}

/// Reply for `/list`, MarkdownV2 formatted.
pub async fn list_reply<S: NotificationSink>(engine: &ReconciliationEngine<S>, timezone: Tz) -> String {
    room_list_text(&engine.list_rooms().await, timezone)
}

async fn reply(bot: &Bot, msg: &Message, text: String) -> ResponseResult<()> {
    bot.send_message(msg.chat.id, text)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}

/// Handle the /frame command.
async fn handle_frame(bot: Bot, msg: Message, engine: Arc<TelegramEngine>, argument: String) -> ResponseResult<()> {
    let room_id = argument.trim();
    if !is_valid_room_id(room_id) {
        return reply(&bot, &msg, "Please give a valid room id".to_string()).await;
    }

    let frame = match engine.key_frame_url(room_id).await {
        Ok(frame) => frame,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "Key frame lookup failed");
            return reply(&bot, &msg, format!("Failed to get key frame of room {}: {}", room_id, e)).await;
        }
    };

    match reqwest::Url::parse(&frame) {
        Ok(url) => {
            bot.send_photo(msg.chat.id, InputFile::url(url))
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
            Ok(())
        }
        Err(e) => reply(&bot, &msg, format!("Key frame URL is invalid: {}", e)).await,
    }
}

/// Dispatch a parsed command.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    engine: Arc<TelegramEngine>,
) -> ResponseResult<()> {
    info!(chat_id = %msg.chat.id, command = ?cmd, "Command received");

    match cmd {
        Command::Start => reply(&bot, &msg, start_reply()).await,
        Command::List => {
            let text = list_reply(&engine, engine.sink().timezone()).await;
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::MarkdownV2)
                .link_preview_options(LinkPreviewOptions {
                    is_disabled: true,
                    url: None,
                    prefer_small_media: false,
                    prefer_large_media: false,
                    show_above_text: false,
                })
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
            Ok(())
        }
        Command::Subscribe(arg) => reply(&bot, &msg, subscribe_reply(&engine, &arg).await).await,
        Command::Unsubscribe(arg) => reply(&bot, &msg, unsubscribe_reply(&engine, &arg).await).await,
        Command::Interval(arg) => reply(&bot, &msg, interval_reply(&engine, &arg)).await,
        Command::Echo(arg) => reply(&bot, &msg, echo_reply(&arg)).await,
        Command::Frame(arg) => handle_frame(bot, msg, engine, arg).await,
    }
}
