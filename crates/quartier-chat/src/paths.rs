//! Store layout of the chat engine.
//!
//! Logical paths, all rooted at the store top level:
//!
//! - `rooms/{roomId}`: [`crate::models::ChatRoom`] records
//! - `room_index/pairs/{loId:hiId}`: 2-party room idempotency index
//! - `messages/{roomId}/{messageId}`: per-room message log
//! - `presence/{userId}`: [`crate::models::PresenceRecord`]
//! - `typing/{roomId}/{userId}`: [`crate::models::TypingRecord`]
//!
//! Ids land in path segments and the pair index key, so they may not
//! contain `/` or `:` (enforced by [`validate_id`] before any store I/O).

use quartier_shared::{MessageId, RoomId, UserId};
use quartier_store::{Result, StorePath};

use crate::error::ChatError;

pub fn rooms() -> Result<StorePath> {
    StorePath::parse("rooms")
}

pub fn room(room: &RoomId) -> Result<StorePath> {
    StorePath::new(["rooms", room.as_str()])
}

pub fn room_unread(room: &RoomId, user: &UserId) -> Result<StorePath> {
    StorePath::new(["rooms", room.as_str(), "unread", user.as_str()])
}

pub fn room_last_message(room: &RoomId) -> Result<StorePath> {
    StorePath::new(["rooms", room.as_str(), "last_message"])
}

pub fn room_last_activity(room: &RoomId) -> Result<StorePath> {
    StorePath::new(["rooms", room.as_str(), "last_activity_millis"])
}

pub fn room_pins(room: &RoomId) -> Result<StorePath> {
    StorePath::new(["rooms", room.as_str(), "pinned_message_ids"])
}

/// Index slot claimed by the first `create_room` for a participant pair.
/// The key orders the two ids so both call orders hit the same slot.
pub fn pair_index(a: &UserId, b: &UserId) -> Result<StorePath> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    StorePath::new([
        "room_index".to_string(),
        "pairs".to_string(),
        format!("{lo}:{hi}"),
    ])
}

pub fn messages(room: &RoomId) -> Result<StorePath> {
    StorePath::new(["messages", room.as_str()])
}

pub fn message(room: &RoomId, id: &MessageId) -> Result<StorePath> {
    StorePath::new(["messages", room.as_str(), id.as_str()])
}

pub fn presence(user: &UserId) -> Result<StorePath> {
    StorePath::new(["presence", user.as_str()])
}

pub fn typing_room(room: &RoomId) -> Result<StorePath> {
    StorePath::new(["typing", room.as_str()])
}

pub fn typing(room: &RoomId, user: &UserId) -> Result<StorePath> {
    StorePath::new(["typing", room.as_str(), user.as_str()])
}

/// Reject ids that cannot live in a path segment or index key.
pub fn validate_id(id: &str) -> std::result::Result<(), ChatError> {
    if id.is_empty() {
        return Err(ChatError::InvalidArgument("empty id".to_string()));
    }
    if id.contains('/') || id.contains(':') {
        return Err(ChatError::InvalidArgument(format!(
            "id '{id}' contains a reserved character"
        )));
    }
    Ok(())
}
