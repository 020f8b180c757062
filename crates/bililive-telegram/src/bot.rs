//! Main Telegram bot implementation.

use std::sync::Arc;
use std::time::Duration;

use bililive_core::{AppConfig, BilibiliApi, EngineConfig, ReconciliationEngine};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{is_transient, retry_after, Result, TelegramError};
use crate::handlers::{handle_command, Command, TelegramEngine};
use crate::sink::TelegramSink;

/// Wait between attempts to register the command list.
const COMMAND_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Live notification bot bound to a single chat.
pub struct LiveNotifyBot {
    bot: Bot,
    engine: Arc<TelegramEngine>,
}

impl LiveNotifyBot {
    /// Build the bot, its sink and the reconciliation engine from configuration.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let bot = Bot::new(&config.bot_token);
        let sink = TelegramSink::new(bot.clone(), ChatId(config.chat_id), config.timezone);
        let api = Arc::new(BilibiliApi::new()?);
        let engine = ReconciliationEngine::new(api, sink, EngineConfig::from(config));

        Ok(Self {
            bot,
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<TelegramEngine> {
        &self.engine
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self.bot.get_me().await?;
        Ok(me.username().to_string())
    }

    /// Register the command list, retrying while Telegram is unreachable.
    async fn register_commands(&self) -> Result<()> {
        loop {
            match self.bot.set_my_commands(Command::bot_commands()).await {
                Ok(_) => {
                    info!("Bot commands registered");
                    return Ok(());
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Failed to register commands, retrying");
                    sleep(COMMAND_RETRY_INTERVAL).await;
                }
                Err(e) => match retry_after(&e) {
                    Some(wait) => sleep(wait).await,
                    None => return Err(e.into()),
                },
            }
        }
    }

    /// Run the poll loop and the command dispatcher until either stops.
    ///
    /// A fatal engine error is returned; Ctrl+C ends the dispatcher and returns `Ok`.
    pub async fn run(&self) -> Result<()> {
        self.register_commands().await?;

        let poll_engine = Arc::clone(&self.engine);
        let poller = tokio::spawn(async move { poll_engine.run().await });

        let chat_id = self.engine.sink().chat_id();
        let engine = Arc::clone(&self.engine);
        let handler = Update::filter_message()
            .filter(move |msg: Message| msg.chat.id == chat_id)
            .filter_command::<Command>()
            .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                let engine = Arc::clone(&engine);
                async move { handle_command(bot, msg, cmd, engine).await }
            });

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .default_handler(|upd| async move {
                debug!(update_id = upd.id.0, "Ignoring update");
            })
            .enable_ctrlc_handler()
            .build();

        info!(chat_id = %chat_id, "Bot is running");

        tokio::select! {
            joined = poller => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(error = %e, "Poll loop stopped");
                    Err(e.into())
                }
                Err(e) => Err(TelegramError::BotStartFailed(format!("poll task failed: {}", e))),
            },
            _ = dispatcher.dispatch() => {
                info!("Dispatcher stopped");
                Ok(())
            }
        }
    }
}
