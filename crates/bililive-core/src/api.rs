//! Bilibili live API client.
//!
//! Only two endpoints are used:
//! - `getRoomBaseInfo`, which answers for many rooms in one request
//! - `get_status_info_by_uids`, used for single key-frame lookups
//!
//! The [`LiveApi`] trait is the seam between the cache in
//! [`RemoteRoomSource`](crate::source::RemoteRoomSource) and the network.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Shanghai;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::{LiveError, Result};
use crate::record::{AreaPath, RoomSnapshot};

/// Batched room info endpoint.
const ROOM_BASE_INFO_URL: &str =
    "https://api.live.bilibili.com/xlive/web-room/v1/index/getRoomBaseInfo";

/// Per-user status endpoint, carries the key frame URL.
const STATUS_BY_UIDS_URL: &str =
    "https://api.live.bilibili.com/room/v1/Room/get_status_info_by_uids";

/// Upstream rejects requests without a browser-like identity.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36 Edg/116.0.1938.54";
const BILIBILI_REFERER: &str = "https://www.bilibili.com";

/// Request timeout for upstream calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `live_time` value reported for rooms that are not live.
const ZERO_TIME_PREFIX: &str = "0000-00-00";

/// Access to the streaming platform.
#[async_trait]
pub trait LiveApi: Send + Sync {
    /// Fetch every requested room in one round trip.
    ///
    /// Rooms the upstream does not know are simply absent from the map.
    async fn fetch_rooms(&self, room_ids: &[String]) -> Result<HashMap<String, RoomSnapshot>>;

    /// Look up the current key frame (thumbnail) URL of a user's room.
    async fn key_frame(&self, user_id: &str) -> Result<String>;
}

/// [`LiveApi`] backed by the public Bilibili HTTP endpoints.
#[derive(Clone)]
pub struct BilibiliApi {
    client: reqwest::Client,
}

impl BilibiliApi {
    /// Create a client with the headers the upstream expects.
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(REFERER, HeaderValue::from_static(BILIBILI_REFERER));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LiveError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl LiveApi for BilibiliApi {
    async fn fetch_rooms(&self, room_ids: &[String]) -> Result<HashMap<String, RoomSnapshot>> {
        let mut query: Vec<(&str, &str)> = vec![("req_biz", "web_room_componet")];
        query.extend(room_ids.iter().map(|id| ("room_ids", id.as_str())));

        debug!(count = room_ids.len(), "Fetching room base info");
        let body = self.get_text(ROOM_BASE_INFO_URL, &query).await?;
        trace!(body = %body, "Room base info response");

        parse_room_base_info(&body)
    }

    async fn key_frame(&self, user_id: &str) -> Result<String> {
        let body = self
            .get_text(STATUS_BY_UIDS_URL, &[("uids[]", user_id)])
            .await?;
        parse_key_frame(&body, user_id)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: Option<i64>,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload, turning a non-zero status into a protocol error.
    fn into_data(self) -> Result<Option<T>> {
        match self.code {
            Some(0) => Ok(self.data),
            Some(code) => Err(LiveError::RemoteProtocol {
                code,
                message: self.message,
            }),
            None => Err(LiveError::RemoteProtocol {
                code: -1,
                message: "response has no code field".to_string(),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RoomBaseInfoData {
    /// Entries are decoded one by one so a broken entry only affects its room.
    #[serde(default)]
    by_room_ids: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RoomBaseInfo {
    room_id: u64,
    #[serde(default)]
    short_id: u64,
    uid: u64,
    #[serde(default)]
    uname: String,
    live_status: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    cover: String,
    #[serde(default)]
    parent_area_name: String,
    #[serde(default)]
    area_name: String,
    #[serde(default)]
    live_time: String,
}

impl RoomBaseInfo {
    fn into_snapshot(self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.to_string(),
            user_id: self.uid.to_string(),
            display_name: self.uname,
            title: self.title,
            cover_url: self.cover,
            area: AreaPath::new(self.parent_area_name, self.area_name),
            // 2 means the room replays recordings, which is not a live session.
            is_living: self.live_status == 1,
            live_since: parse_live_time(&self.live_time),
        }
    }
}

/// Parse a `getRoomBaseInfo` body into snapshots keyed by room id.
///
/// Rooms with a short id are reachable under both ids.
pub fn parse_room_base_info(body: &str) -> Result<HashMap<String, RoomSnapshot>> {
    let envelope: Envelope<RoomBaseInfoData> =
        serde_json::from_str(body).map_err(|e| LiveError::RemoteProtocol {
            code: -1,
            message: format!("malformed room info response: {}", e),
        })?;

    let entries = envelope
        .into_data()?
        .and_then(|data| data.by_room_ids)
        .unwrap_or_default();

    let mut rooms = HashMap::with_capacity(entries.len());
    for (key, entry) in entries {
        let info = match serde_json::from_value::<RoomBaseInfo>(entry) {
            Ok(info) => info,
            Err(e) => {
                warn!(room_id = %key, error = %e, "Skipping malformed room entry");
                continue;
            }
        };
        let short_id = info.short_id;
        let snapshot = info.into_snapshot();
        if short_id != 0 {
            rooms.insert(short_id.to_string(), snapshot.clone());
        }
        rooms.insert(snapshot.room_id.clone(), snapshot);
    }
    Ok(rooms)
}

/// Parse a `get_status_info_by_uids` body and pull out the key frame of `user_id`.
pub fn parse_key_frame(body: &str, user_id: &str) -> Result<String> {
    let envelope: Envelope<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| LiveError::RemoteProtocol {
            code: -1,
            message: format!("malformed status response: {}", e),
        })?;

    envelope
        .into_data()?
        .as_ref()
        .and_then(|data| data.get(user_id))
        .and_then(|status| status.get("keyframe"))
        .and_then(|frame| frame.as_str())
        .filter(|frame| !frame.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LiveError::RoomNotFound(user_id.to_string()))
}

/// Parse upstream `live_time`, which is local to Asia/Shanghai.
pub fn parse_live_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with(ZERO_TIME_PREFIX) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()?;
    Shanghai
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
