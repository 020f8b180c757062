//! Batched, single-consumption cache in front of [`LiveApi`].
//!
//! Asking for one room triggers one request covering every registered room.
//! Each room's answer can then be read exactly once; the next read of the same
//! room triggers a fresh batch. Within one poll sweep this costs a single
//! request, and no snapshot is ever acted on twice.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::LiveApi;
use crate::error::{LiveError, Result};
use crate::record::RoomSnapshot;

/// What a batch said about one room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEntry {
    Found(RoomSnapshot),
    /// The room was requested but absent from the response.
    Invalid,
}

/// Cache state of one registered room.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CacheSlot {
    /// Must be refetched before it can be read.
    #[default]
    Stale,
    /// Filled by the last batch and not read yet.
    Ready(RoomEntry),
}

/// Batched accessor for room state.
pub struct RemoteRoomSource {
    api: Arc<dyn LiveApi>,
    slots: BTreeMap<String, CacheSlot>,
}

impl RemoteRoomSource {
    pub fn new(api: Arc<dyn LiveApi>) -> Self {
        Self {
            api,
            slots: BTreeMap::new(),
        }
    }

    /// Register a room. Registering twice keeps the existing slot.
    pub fn add_room(&mut self, room_id: &str) {
        self.slots.entry(room_id.to_string()).or_default();
    }

    /// Forget a room. Unknown ids are ignored.
    pub fn remove_room(&mut self, room_id: &str) {
        self.slots.remove(room_id);
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.slots.contains_key(room_id)
    }

    /// Registered room ids, in ascending order.
    pub fn room_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Current slot of a room, for inspection.
    pub fn slot(&self, room_id: &str) -> Option<&CacheSlot> {
        self.slots.get(room_id)
    }

    /// Return the room's snapshot, fetching a new batch if its slot is stale.
    ///
    /// The slot is stale again afterwards. Unregistered ids are registered
    /// first so they take part in the batch.
    pub async fn get_room_info(&mut self, room_id: &str) -> Result<RoomSnapshot> {
        self.add_room(room_id);

        if !matches!(self.slots.get(room_id), Some(CacheSlot::Ready(_))) {
            self.refresh_all().await?;
        }

        let slot = self
            .slots
            .get_mut(room_id)
            .map(std::mem::take)
            .unwrap_or_default();

        match slot {
            CacheSlot::Ready(RoomEntry::Found(snapshot)) => Ok(snapshot),
            CacheSlot::Ready(RoomEntry::Invalid) | CacheSlot::Stale => {
                Err(LiveError::RoomNotFound(room_id.to_string()))
            }
        }
    }

    /// Fetch every registered room in one request.
    ///
    /// On failure the cache is left exactly as it was.
    pub async fn refresh_all(&mut self) -> Result<()> {
        if self.slots.is_empty() {
            return Ok(());
        }

        let ids = self.room_ids();
        let mut fetched = self.api.fetch_rooms(&ids).await.map_err(|e| {
            warn!(count = ids.len(), error = %e, "Batched room fetch failed");
            e
        })?;

        for (room_id, slot) in self.slots.iter_mut() {
            *slot = CacheSlot::Ready(match fetched.remove(room_id) {
                Some(snapshot) => RoomEntry::Found(snapshot),
                None => RoomEntry::Invalid,
            });
        }

        debug!(count = ids.len(), "Room cache refreshed");
        Ok(())
    }

    /// Key frame URL of a user's room. Does not touch the cache.
    ///
    /// The returned future does not borrow the source, so callers can release
    /// their lock before awaiting it.
    pub fn get_key_frame(&self, user_id: &str) -> impl Future<Output = Result<String>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let user_id = user_id.to_string();
        async move { api.key_frame(&user_id).await }
    }
}
