//! Bililive Core - room watching and notification lifecycle.
//!
//! This crate holds everything that decides *when* a notification is sent,
//! edited or finalized; delivering it is left to a [`NotificationSink`]:
//!
//! - **api**: Bilibili HTTP client behind the [`LiveApi`] trait
//! - **source**: batched, single-consumption room cache
//! - **record**: per-room state and snapshot diffing
//! - **engine**: subscription set, transition policy and poll loop
//! - **policy**: failure classification (disable / back off / fatal)
//! - **sink**: the notification interface the engine drives
//! - **config**: process configuration from environment and JSON file

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod policy;
pub mod record;
pub mod sink;
pub mod source;

pub use api::{BilibiliApi, LiveApi};
pub use config::{AppConfig, EngineConfig};
pub use engine::{ReconciliationEngine, RoomUpdate};
pub use error::{LiveError, Result};
pub use policy::{ErrorAction, ErrorPolicy};
pub use record::{is_valid_room_id, AreaPath, RoomRecord, RoomSnapshot, RoomState};
pub use sink::NotificationSink;
pub use source::{CacheSlot, RemoteRoomSource, RoomEntry};
