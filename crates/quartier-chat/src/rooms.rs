//! Room lifecycle, membership, and unread-count bookkeeping.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use quartier_shared::{MessageId, RoomId, UserId};
use quartier_store::{DurableStore, WriteOp};

use crate::error::{ChatError, Result};
use crate::models::{ChatRoom, ChatUser};
use crate::paths;

/// Owns chat room creation, membership queries, and per-room unread
/// counters.
#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn DurableStore>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Create a room for the given participants.
    ///
    /// Participants are deduplicated by id; fewer than 2 unique ids is
    /// rejected before any store I/O.  For exactly 2 participants the call
    /// is idempotent: rapid or concurrent invocations for the same pair
    /// all resolve to one room.  Group rooms (3+) always create fresh.
    pub async fn create_room(&self, participants: &[ChatUser]) -> Result<RoomId> {
        let mut seen = BTreeSet::new();
        let mut unique = Vec::new();
        for p in participants {
            paths::validate_id(p.id.as_str())?;
            if seen.insert(p.id.clone()) {
                unique.push(p.clone());
            }
        }
        if unique.len() < 2 {
            return Err(ChatError::InvalidArgument(format!(
                "a room needs at least 2 unique participants, got {}",
                unique.len()
            )));
        }

        let id = RoomId::new(self.store.generate_id());
        let now = self.store.now_millis();
        let room = ChatRoom {
            id: id.clone(),
            unread: unique.iter().map(|p| (p.id.clone(), 0)).collect(),
            participants: unique,
            last_message: None,
            last_activity_millis: now,
            created_at_millis: now,
            pinned_message_ids: Vec::new(),
        };

        if room.participants.len() == 2 {
            return self.create_pair_room(room).await;
        }

        self.store
            .set(&paths::room(&id)?, encode(&room)?)
            .await?;
        info!(room = %id, participants = room.participants.len(), "created group room");
        Ok(id)
    }

    /// 2-party creation claims an index slot keyed by the ordered pair of
    /// ids, then writes the room record.  Losers return the winner's id.
    /// Claiming first means a failure between the two writes leaves no
    /// orphan record; a claim whose record never landed is repaired by
    /// the next create, which reuses the claimed id.
    async fn create_pair_room(&self, mut room: ChatRoom) -> Result<RoomId> {
        let a = &room.participants[0].id;
        let b = &room.participants[1].id;
        let index_path = paths::pair_index(a, b)?;

        let mut existing: Option<String> = None;
        let claimed = self
            .store
            .transaction(&index_path, &mut |current| match current {
                Some(Value::String(winner)) => {
                    existing = Some(winner);
                    None
                }
                _ => Some(Value::String(room.id.as_str().to_string())),
            })
            .await?;

        if claimed.is_some() {
            self.store
                .set(&paths::room(&room.id)?, encode(&room)?)
                .await?;
            info!(room = %room.id, "created 2-party room");
            return Ok(room.id);
        }

        let winner = RoomId::new(existing.ok_or_else(|| {
            ChatError::Internal(anyhow::anyhow!("pair index aborted without a winner"))
        })?);

        if self.store.get(&paths::room(&winner)?).await?.is_none() {
            // The earlier winner claimed the slot but its record write
            // never landed.  Reuse the claimed id for our record.
            room.id = winner.clone();
            self.store
                .set(&paths::room(&winner)?, encode(&room)?)
                .await?;
            info!(room = %winner, "repaired 2-party room record");
            return Ok(winner);
        }

        debug!(room = %winner, "reusing existing 2-party room");
        Ok(winner)
    }

    /// Fetch a single room.
    pub async fn get_room(&self, room: &RoomId) -> Result<ChatRoom> {
        fetch_room(self.store.as_ref(), room).await
    }

    /// Every room `user` participates in, most recently active first.
    ///
    /// The descending `last_activity_millis` order is a UI contract, with
    /// the room id as tiebreak so repeated reads are stable.
    pub async fn list_rooms(&self, user: &UserId) -> Result<Vec<ChatRoom>> {
        let snapshot = self.store.get(&paths::rooms()?).await?;
        let mut rooms = decode_room_map(snapshot);
        rooms.retain(|r| r.is_participant(user));
        sort_rooms(&mut rooms);
        Ok(rooms)
    }

    /// Reset the caller's own unread counter to zero.  Never touches any
    /// other participant's counter.
    pub async fn mark_read(&self, room: &RoomId, user: &UserId) -> Result<()> {
        let record = fetch_room(self.store.as_ref(), room).await?;
        if !record.is_participant(user) {
            return Err(ChatError::Unauthorized(format!(
                "{user} is not a participant of room {room}"
            )));
        }

        self.store
            .update(vec![(
                paths::room_unread(room, user)?,
                WriteOp::Set(Value::from(0)),
            )])
            .await?;
        debug!(room = %room, user = %user.short(), "marked room read");
        Ok(())
    }

    /// Pin a message in the room.  Idempotent; participant-only.
    pub async fn pin_message(
        &self,
        room: &RoomId,
        user: &UserId,
        message: &MessageId,
    ) -> Result<()> {
        let record = fetch_room(self.store.as_ref(), room).await?;
        if !record.is_participant(user) {
            return Err(ChatError::Unauthorized(format!(
                "{user} is not a participant of room {room}"
            )));
        }
        if self
            .store
            .get(&paths::message(room, message)?)
            .await?
            .is_none()
        {
            return Err(ChatError::NotFound(format!("message {message}")));
        }

        let pinned = message.as_str().to_string();
        self.store
            .transaction(&paths::room_pins(room)?, &mut |current| {
                let mut ids = decode_id_list(current);
                if ids.iter().any(|id| id == &pinned) {
                    return None; // already pinned
                }
                ids.push(pinned.clone());
                Some(Value::from(ids))
            })
            .await?;
        Ok(())
    }

    /// Unpin a message.  Idempotent; participant-only.
    pub async fn unpin_message(
        &self,
        room: &RoomId,
        user: &UserId,
        message: &MessageId,
    ) -> Result<()> {
        let record = fetch_room(self.store.as_ref(), room).await?;
        if !record.is_participant(user) {
            return Err(ChatError::Unauthorized(format!(
                "{user} is not a participant of room {room}"
            )));
        }

        let unpinned = message.as_str().to_string();
        self.store
            .transaction(&paths::room_pins(room)?, &mut |current| {
                let ids = decode_id_list(current);
                if !ids.iter().any(|id| id == &unpinned) {
                    return None; // nothing to do
                }
                let remaining: Vec<String> =
                    ids.into_iter().filter(|id| id != &unpinned).collect();
                Some(Value::from(remaining))
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers shared with the message log and the event layer
// ---------------------------------------------------------------------------

pub(crate) async fn fetch_room(store: &dyn DurableStore, room: &RoomId) -> Result<ChatRoom> {
    let value = store
        .get(&paths::room(room)?)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("room {room}")))?;
    serde_json::from_value(value).map_err(|e| ChatError::Internal(e.into()))
}

pub(crate) fn sort_rooms(rooms: &mut [ChatRoom]) {
    rooms.sort_by(|a, b| {
        b.last_activity_millis
            .cmp(&a.last_activity_millis)
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn decode_room_map(snapshot: Option<Value>) -> Vec<ChatRoom> {
    let Some(Value::Object(map)) = snapshot else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(id, value)| match serde_json::from_value(value) {
            Ok(room) => Some(room),
            Err(e) => {
                warn!(room = %id, error = %e, "skipping undecodable room record");
                None
            }
        })
        .collect()
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ChatError::Internal(e.into()))
}

fn decode_id_list(current: Option<Value>) -> Vec<String> {
    match current {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
