//! Per-room state tracked by the engine.
//!
//! A [`RoomRecord`] holds what was last committed for a room; a [`RoomSnapshot`]
//! is what the upstream reported on the latest fetch. The engine diffs the two
//! and only folds the snapshot into the record once the matching notification
//! call has succeeded.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Category path of a room: parent area and sub-area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaPath {
    pub parent: String,
    pub child: String,
}

impl AreaPath {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

impl fmt::Display for AreaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.parent, self.child)
    }
}

/// One room's state as reported by a single upstream fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub user_id: String,
    pub display_name: String,
    pub title: String,
    pub cover_url: String,
    pub area: AreaPath,
    pub is_living: bool,
    /// Session start as reported upstream; `None` for the zero-time sentinel.
    pub live_since: Option<DateTime<Utc>>,
}

/// Observed state of a room, derived from its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// No successful fetch yet.
    Unknown,
    Offline,
    Live,
}

/// Last committed state of a subscribed room.
///
/// `H` is the opaque message handle handed out by the notification sink.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord<H> {
    pub room_id: String,
    /// `None` until the first successful fetch.
    pub is_living: Option<bool>,
    /// Cleared for good once the upstream reports the room missing.
    pub is_valid: bool,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub current_title: Option<String>,
    pub cover_url: Option<String>,
    pub area: Option<AreaPath>,
    /// Earlier titles of the current session, oldest first.
    pub title_history: Vec<String>,
    pub session_start: Option<DateTime<Utc>>,
    pub session_stop: Option<DateTime<Utc>>,
    /// Handle of the message announcing the current session.
    pub message: Option<H>,
}

impl<H> RoomRecord<H> {
    /// Create an empty record for a freshly subscribed room.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            is_living: None,
            is_valid: true,
            user_id: None,
            display_name: None,
            current_title: None,
            cover_url: None,
            area: None,
            title_history: Vec::new(),
            session_start: None,
            session_stop: None,
            message: None,
        }
    }

    pub fn state(&self) -> RoomState {
        match self.is_living {
            None => RoomState::Unknown,
            Some(false) => RoomState::Offline,
            Some(true) => RoomState::Live,
        }
    }

    /// Whether the snapshot differs in any displayed field.
    ///
    /// The session start is not compared: upstream zeroes it when a stream ends.
    pub fn has_update(&self, snapshot: &RoomSnapshot) -> bool {
        self.current_title.as_deref() != Some(snapshot.title.as_str())
            || self.display_name.as_deref() != Some(snapshot.display_name.as_str())
            || self.cover_url.as_deref() != Some(snapshot.cover_url.as_str())
            || self.area.as_ref() != Some(&snapshot.area)
    }

    /// Copy the non-session metadata of a snapshot.
    fn apply_metadata(&mut self, snapshot: &RoomSnapshot) {
        self.user_id = Some(snapshot.user_id.clone());
        self.display_name = Some(snapshot.display_name.clone());
        self.current_title = Some(snapshot.title.clone());
        self.cover_url = Some(snapshot.cover_url.clone());
        self.area = Some(snapshot.area.clone());
    }

    /// Record an offline observation; session fields are left alone.
    pub fn observe_offline(&mut self, snapshot: &RoomSnapshot) {
        self.apply_metadata(snapshot);
        self.is_living = Some(false);
    }

    /// Start a new session from a live snapshot.
    ///
    /// Falls back to `now` when upstream did not report a start time.
    pub fn begin_session(&mut self, snapshot: &RoomSnapshot, now: DateTime<Utc>) {
        self.apply_metadata(snapshot);
        self.is_living = Some(true);
        self.title_history.clear();
        self.session_start = Some(snapshot.live_since.unwrap_or(now));
        self.session_stop = None;
    }

    /// Fold a materially changed live snapshot into the record.
    pub fn apply_live_update(&mut self, snapshot: &RoomSnapshot) {
        if let Some(previous) = self.current_title.take() {
            if previous != snapshot.title {
                self.title_history.push(previous);
            }
        }
        self.apply_metadata(snapshot);
        self.is_living = Some(true);
        if let Some(start) = snapshot.live_since {
            self.session_start = Some(start);
        }
    }

    /// Refresh fields that never warrant a message edit.
    pub fn refresh_volatile(&mut self, snapshot: &RoomSnapshot) {
        self.user_id = Some(snapshot.user_id.clone());
        self.is_living = Some(true);
        if self.session_start.is_none() {
            self.session_start = snapshot.live_since;
        }
    }

    /// Stamp the end of the current session.
    pub fn finish_session(&mut self, now: DateTime<Utc>) {
        self.is_living = Some(false);
        self.session_stop = Some(now);
    }

    /// Drop everything tied to the session that just ended.
    pub fn clear_session(&mut self) {
        self.title_history.clear();
        self.message = None;
    }

    /// Length of the session, once both ends are known.
    pub fn session_duration(&self) -> Option<Duration> {
        match (self.session_start, self.session_stop) {
            (Some(start), Some(stop)) => Some(stop - start),
            _ => None,
        }
    }
}

/// Check that a room id is the canonical form of a positive integer.
///
/// Rejects empty strings, non-ASCII digits, zero and leading zeros.
pub fn is_valid_room_id(id: &str) -> bool {
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && !id.starts_with('0')
        && id.parse::<u64>().is_ok()
}
