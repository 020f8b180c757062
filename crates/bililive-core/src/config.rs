//! Process and engine configuration.
//!
//! # Sources
//!
//! Every key is looked up as an environment variable first, then in a JSON
//! config file:
//!
//! | key | environment variable | default |
//! |---|---|---|
//! | `tgbot_token` | `BILILIVENOTIBOT_TGBOT_TOKEN` | required |
//! | `tg_chat_id` | `BILILIVENOTIBOT_TG_CHAT_ID` | required |
//! | `timezone` | `BILILIVENOTIBOT_TIMEZONE` | `Asia/Shanghai` |
//! | `poll_interval` | `BILILIVENOTIBOT_POLL_INTERVAL` | `60` |
//! | `subscribed_rooms` | `BILILIVENOTIBOT_SUBSCRIBED_ROOMS` | empty |
//!
//! The config file is the path given on the command line, else
//! `./config.json`, else `<config dir>/bililive-notify/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{LiveError, Result};
use crate::policy::{ErrorPolicy, DEFAULT_DESTINATION_BACKOFF, DEFAULT_TRANSPORT_BACKOFF};
use crate::record::is_valid_room_id;

/// Prefix of every configuration environment variable.
pub const ENV_PREFIX: &str = "BILILIVENOTIBOT_";

/// Config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Directory name under the platform config dir.
const APP_DIR_NAME: &str = "bililive-notify";

const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Settings the process is started with.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub chat_id: i64,
    /// Zone used when displaying times.
    pub timezone: Tz,
    pub poll_interval: Duration,
    /// Rooms to subscribe at startup, validated and de-duplicated.
    pub subscribed_rooms: Vec<String>,
}

impl AppConfig {
    /// Load from the process environment and the config file.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => match default_config_file() {
                Some(path) => Some(read_config_file(&path)?),
                None => None,
            },
        };
        Self::from_sources(|name| std::env::var(name).ok(), file.as_ref())
    }

    /// Build from an environment lookup and an optional parsed config file.
    pub fn from_sources<F>(env: F, file: Option<&Map<String, Value>>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| -> Option<Value> {
            let env_key = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Some(value) = env(&env_key) {
                debug!(key, "Read config from environment");
                return Some(Value::String(value));
            }
            let value = file.and_then(|f| f.get(key)).filter(|v| !v.is_null())?;
            debug!(key, "Read config from file");
            Some(value.clone())
        };

        let bot_token = lookup("tgbot_token")
            .and_then(|v| scalar_to_string(&v))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("tgbot_token"))?;

        let chat_id_raw = lookup("tg_chat_id")
            .and_then(|v| scalar_to_string(&v))
            .ok_or_else(|| missing("tg_chat_id"))?;
        let chat_id = chat_id_raw.trim().parse::<i64>().map_err(|_| {
            LiveError::Config(format!("tg_chat_id is not an integer: {}", chat_id_raw))
        })?;

        let timezone_raw = lookup("timezone")
            .and_then(|v| scalar_to_string(&v))
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = timezone_raw
            .trim()
            .parse::<Tz>()
            .map_err(|_| LiveError::Config(format!("unknown timezone: {}", timezone_raw)))?;

        let poll_interval = match lookup("poll_interval").and_then(|v| scalar_to_string(&v)) {
            Some(raw) => parse_poll_interval(&raw)?,
            None => Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        };

        let subscribed_rooms = lookup("subscribed_rooms")
            .map(|v| parse_room_list(&v))
            .unwrap_or_default();

        Ok(Self {
            bot_token,
            chat_id,
            timezone,
            poll_interval,
            subscribed_rooms,
        })
    }
}

fn missing(key: &str) -> LiveError {
    LiveError::Config(format!(
        "{} is not specified (set {}{} or add it to {})",
        key,
        ENV_PREFIX,
        key.to_uppercase(),
        CONFIG_FILE_NAME
    ))
}

/// Strings pass through, numbers are printed; anything else is rejected.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_poll_interval(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(LiveError::Config(format!(
            "poll_interval must be a positive integer: {}",
            raw
        ))),
    }
}

/// Accepts a JSON array or a comma-separated string; keeps first-seen order.
fn parse_room_list(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(other)
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
    };

    let mut rooms: Vec<String> = Vec::with_capacity(raw.len());
    for id in raw {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        if !is_valid_room_id(id) {
            warn!(room_id = %id, "Ignoring invalid room id in configuration");
            continue;
        }
        if !rooms.iter().any(|r| r == id) {
            rooms.push(id.to_string());
        }
    }
    rooms
}

/// First existing default config file, if any.
pub fn default_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

/// Read a config file into a JSON object.
pub fn read_config_file(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        _ => Err(LiveError::Config(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
    }
}

/// Timing of the reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between two full sweeps.
    pub poll_interval: Duration,
    /// Backoff durations for retryable failures.
    pub policy: ErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            policy: ErrorPolicy {
                transport_backoff: DEFAULT_TRANSPORT_BACKOFF,
                destination_backoff: DEFAULT_DESTINATION_BACKOFF,
            },
        }
    }
}

impl EngineConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the pause after transport and 5xx failures.
    pub fn with_transport_backoff(mut self, backoff: Duration) -> Self {
        self.policy.transport_backoff = backoff;
        self
    }

    /// Sets the pause after the chat destination was not found.
    pub fn with_destination_backoff(mut self, backoff: Duration) -> Self {
        self.policy.destination_backoff = backoff;
        self
    }
}

impl From<&AppConfig> for EngineConfig {
    fn from(app: &AppConfig) -> Self {
        EngineConfig::new().with_poll_interval(app.poll_interval)
    }
}
