//! Room-state reconciliation engine.
//!
//! The engine owns the subscription list and one [`RoomRecord`] per room. Each
//! poll sweep walks the rooms in subscription order, fetches a snapshot through
//! the batched [`RemoteRoomSource`], and applies this transition table:
//!
//! ```text
//! record \ fetched | offline                      | live
//! -----------------+------------------------------+---------------------------------
//! unknown/offline  | refresh metadata             | send_start, begin session
//! live             | mark_ended, close session    | edit_in_place if materially changed
//! ```
//!
//! A record is only rewritten after the notification call for its transition
//! succeeded. When the call fails the record is untouched and the next sweep
//! retries the same transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::api::LiveApi;
use crate::config::EngineConfig;
use crate::error::{LiveError, Result};
use crate::policy::{ErrorAction, ErrorPolicy};
use crate::record::{is_valid_room_id, RoomRecord, RoomState};
use crate::sink::NotificationSink;
use crate::source::RemoteRoomSource;

/// What happened to a room during one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomUpdate {
    /// Room unsubscribed or already disabled.
    Skipped,
    /// Room is offline; metadata refreshed.
    Offline,
    /// Session started and announced.
    Started,
    /// Announcement edited after a material change.
    Updated,
    /// Still live with nothing worth an edit.
    Unchanged,
    /// Session ended and announcement finalized.
    Ended,
    /// Room reported missing upstream and disabled.
    Disabled,
    /// Retryable failure; the sweep should pause this long.
    Backoff(Duration),
}

/// State guarded by the engine mutex.
struct EngineState<H> {
    /// Room ids in subscription order.
    subscribed: Vec<String>,
    records: HashMap<String, RoomRecord<H>>,
    source: RemoteRoomSource,
}

/// Drives room records from upstream snapshots and keeps one message per session.
pub struct ReconciliationEngine<S: NotificationSink> {
    state: Mutex<EngineState<S::Handle>>,
    sink: S,
    poll_interval_secs: AtomicU64,
    policy: ErrorPolicy,
}

impl<S: NotificationSink> ReconciliationEngine<S> {
    /// Create an engine with no subscriptions.
    pub fn new(api: Arc<dyn LiveApi>, sink: S, config: EngineConfig) -> Self {
        Self {
            state: Mutex::new(EngineState {
                subscribed: Vec::new(),
                records: HashMap::new(),
                source: RemoteRoomSource::new(api),
            }),
            sink,
            poll_interval_secs: AtomicU64::new(config.poll_interval.as_secs().max(1)),
            policy: config.policy,
        }
    }

    /// The notification sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Add rooms to the subscription list.
    ///
    /// Invalid and already subscribed ids are skipped. Returns the ids that
    /// were actually added, in order.
    pub async fn subscribe(&self, room_ids: &[String]) -> Vec<String> {
        let mut state = self.state.lock().await;
        let mut added = Vec::new();

        for room_id in room_ids {
            let room_id = room_id.trim();
            if !is_valid_room_id(room_id) {
                warn!(room_id = %room_id, "Ignoring invalid room id");
                continue;
            }
            if state.records.contains_key(room_id) {
                continue;
            }
            state.subscribed.push(room_id.to_string());
            state
                .records
                .insert(room_id.to_string(), RoomRecord::new(room_id));
            state.source.add_room(room_id);
            added.push(room_id.to_string());
        }

        if !added.is_empty() {
            info!(rooms = ?added, "Subscribed rooms");
        }
        added
    }

    /// Remove rooms from the subscription list. Returns the ids that were removed.
    pub async fn unsubscribe(&self, room_ids: &[String]) -> Vec<String> {
        let mut state = self.state.lock().await;
        let mut removed = Vec::new();

        for room_id in room_ids {
            let room_id = room_id.trim();
            if state.records.remove(room_id).is_none() {
                continue;
            }
            state.subscribed.retain(|id| id != room_id);
            state.source.remove_room(room_id);
            removed.push(room_id.to_string());
        }

        if !removed.is_empty() {
            info!(rooms = ?removed, "Unsubscribed rooms");
        }
        removed
    }

    /// Whether a room is currently subscribed.
    pub async fn is_subscribed(&self, room_id: &str) -> bool {
        self.state.lock().await.records.contains_key(room_id)
    }

    /// Snapshot of every subscribed record, in subscription order.
    pub async fn list_rooms(&self) -> Vec<RoomRecord<S::Handle>> {
        let state = self.state.lock().await;
        state
            .subscribed
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    /// Current record of one room.
    pub async fn room(&self, room_id: &str) -> Option<RoomRecord<S::Handle>> {
        self.state.lock().await.records.get(room_id).cloned()
    }

    /// Seconds between two sweeps.
    pub fn poll_interval(&self) -> u64 {
        self.poll_interval_secs.load(Ordering::Relaxed)
    }

    /// Change the sweep interval, returning the previous value.
    pub fn set_poll_interval(&self, secs: u64) -> Result<u64> {
        if secs == 0 {
            return Err(LiveError::Config(
                "poll interval must be positive".to_string(),
            ));
        }
        let previous = self.poll_interval_secs.swap(secs, Ordering::Relaxed);
        info!(previous, current = secs, "Poll interval changed");
        Ok(previous)
    }

    /// Key frame URL of a subscribed room.
    ///
    /// Needs the room's user id, so the room must have been fetched once.
    ///
    /// The lock is released before the upstream request.
    pub async fn key_frame_url(&self, room_id: &str) -> Result<String> {
        let lookup = {
            let state = self.state.lock().await;
            let user_id = state
                .records
                .get(room_id)
                .filter(|record| record.is_valid)
                .and_then(|record| record.user_id.as_deref())
                .ok_or_else(|| LiveError::RoomNotFound(room_id.to_string()))?;
            state.source.get_key_frame(user_id)
        };
        lookup.await
    }

    /// Reconcile one room against a fresh snapshot.
    ///
    /// Per-room failures are classified here. Only fatal errors are returned;
    /// retryable ones come back as [`RoomUpdate::Backoff`].
    pub async fn update_room_information(&self, room_id: &str) -> Result<RoomUpdate> {
        let mut state = self.state.lock().await;

        match state.records.get(room_id) {
            Some(record) if record.is_valid => {}
            _ => return Ok(RoomUpdate::Skipped),
        }

        let error = match self.reconcile(&mut state, room_id).await {
            Ok(update) => return Ok(update),
            Err(e) => e,
        };

        match self.policy.classify(&error) {
            ErrorAction::DisableRoom => {
                warn!(room_id = %room_id, error = %error, "Room not found upstream, disabling");
                if let Some(record) = state.records.get_mut(room_id) {
                    record.is_valid = false;
                }
                state.source.remove_room(room_id);

                let warning = format!("Room {} does not exist and has been disabled", room_id);
                if let Err(e) = self.sink.send_warning(&warning).await {
                    warn!(room_id = %room_id, error = %e, "Failed to send warning message");
                }
                Ok(RoomUpdate::Disabled)
            }
            ErrorAction::Backoff(wait) => {
                warn!(
                    room_id = %room_id,
                    error = %error,
                    backoff_secs = wait.as_secs(),
                    "Retryable failure, pausing poll cycle"
                );
                Ok(RoomUpdate::Backoff(wait))
            }
            ErrorAction::Fatal => {
                error!(room_id = %room_id, error = ?error, "Unrecoverable error while updating room");
                Err(error)
            }
        }
    }

    async fn reconcile(
        &self,
        state: &mut EngineState<S::Handle>,
        room_id: &str,
    ) -> Result<RoomUpdate> {
        let snapshot = state.source.get_room_info(room_id).await?;
        info!(
            room_id = %room_id,
            uname = %snapshot.display_name,
            is_living = snapshot.is_living,
            "Retrieved room info"
        );

        let Some(current) = state.records.get(room_id) else {
            return Ok(RoomUpdate::Skipped);
        };
        let now = Utc::now();

        let (next, update) = match (current.state(), snapshot.is_living) {
            (RoomState::Unknown | RoomState::Offline, false) => {
                let mut next = current.clone();
                next.observe_offline(&snapshot);
                (next, RoomUpdate::Offline)
            }
            (RoomState::Unknown | RoomState::Offline, true) => {
                info!(room_id = %room_id, "Sending live start message");
                let mut next = current.clone();
                next.begin_session(&snapshot, now);
                next.message = Some(self.sink.send_start(&next).await?);
                (next, RoomUpdate::Started)
            }
            (RoomState::Live, true) if !current.has_update(&snapshot) => {
                let mut next = current.clone();
                next.refresh_volatile(&snapshot);
                (next, RoomUpdate::Unchanged)
            }
            (RoomState::Live, true) => {
                info!(room_id = %room_id, "Updating sent live message");
                let mut next = current.clone();
                next.apply_live_update(&snapshot);
                let handle = match &current.message {
                    Some(handle) => self.sink.edit_in_place(handle, &next).await?,
                    None => self.sink.send_start(&next).await?,
                };
                next.message = Some(handle);
                (next, RoomUpdate::Updated)
            }
            (RoomState::Live, false) => {
                info!(room_id = %room_id, "Live ended, marking sent message");
                let mut next = current.clone();
                next.finish_session(now);
                if let Some(handle) = &current.message {
                    self.sink.mark_ended(handle, &next).await?;
                }
                next.clear_session();
                (next, RoomUpdate::Ended)
            }
        };

        state.records.insert(room_id.to_string(), next);
        Ok(update)
    }

    /// Drop every room marked invalid. Returns the removed ids.
    pub async fn delete_invalid_rooms(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let invalid: Vec<String> = state
            .subscribed
            .iter()
            .filter(|id| state.records.get(*id).map_or(true, |r| !r.is_valid))
            .cloned()
            .collect();

        for room_id in &invalid {
            state.records.remove(room_id);
            state.source.remove_room(room_id);
        }
        state.subscribed.retain(|id| !invalid.contains(id));

        if !invalid.is_empty() {
            info!(rooms = ?invalid, "Deleted invalid rooms");
        }
        invalid
    }

    /// Run one full sweep followed by the cleanup pass.
    ///
    /// The lock is taken per room so commands interleave between rooms;
    /// backoff sleeps happen outside it.
    pub async fn poll_once(&self) -> Result<()> {
        let room_ids = self.state.lock().await.subscribed.clone();
        debug!(count = room_ids.len(), "Starting poll sweep");

        for room_id in room_ids {
            if let RoomUpdate::Backoff(wait) = self.update_room_information(&room_id).await? {
                sleep(wait).await;
            }
        }

        self.delete_invalid_rooms().await;
        Ok(())
    }

    /// Poll forever. Returns only when a fatal error occurs.
    pub async fn run(&self) -> Result<()> {
        info!(interval_secs = self.poll_interval(), "Start subscribing live rooms");
        loop {
            self.poll_once().await?;
            sleep(Duration::from_secs(self.poll_interval())).await;
        }
    }
}
