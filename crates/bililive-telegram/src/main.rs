//! Bilibili live notification bot binary.
//!
//! Start the bot with:
//! ```bash
//! BILILIVENOTIBOT_TGBOT_TOKEN=xxx BILILIVENOTIBOT_TG_CHAT_ID=123 cargo run -p bililive-telegram
//! ```

use std::path::PathBuf;

use bililive_core::AppConfig;
use bililive_telegram::LiveNotifyBot;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Bilibili live notification bot - announces live sessions in a Telegram chat
#[derive(Parser, Debug)]
#[command(name = "bililive-telegram")]
#[command(about = "Telegram bot that announces Bilibili live sessions")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _ = dotenvy::dotenv();

    let filter = match args.verbose {
        0 => "bililive_telegram=info,bililive_core=info,teloxide=warn",
        1 => "bililive_telegram=debug,bililive_core=debug,teloxide=info",
        2 => "bililive_telegram=trace,bililive_core=trace,teloxide=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load(args.config.as_deref())?;
    tracing::info!(
        chat_id = config.chat_id,
        timezone = %config.timezone.name(),
        interval_secs = config.poll_interval.as_secs(),
        "Configuration loaded"
    );

    let bot = LiveNotifyBot::new(&config)?;

    match bot.get_me().await {
        Ok(username) => tracing::info!(username = %username, "Bot initialized successfully"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    }

    bot.engine().subscribe(&config.subscribed_rooms).await;
    bot.run().await?;

    Ok(())
}
