//! Domain model structs persisted in the durable store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it round-trips
//! through the store's JSON values and can be handed directly to the UI
//! layer.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use quartier_shared::{MessageId, RoomId, UserId};

// ---------------------------------------------------------------------------
// ChatUser
// ---------------------------------------------------------------------------

/// An identity snapshot supplied by the identity provider.
///
/// Copied into messages at send time, so historical messages render with
/// the name and avatar the sender had when they sent them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatUser {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at_millis: Option<i64>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            photo_url: None,
            is_online: None,
            last_seen_at_millis: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// What kind of content a message carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Serialized location payload.
    Location,
    /// URL of an uploaded blob.
    Media,
}

/// Delivery state of a message.  Transitions only move forward:
/// `Sent -> Delivered -> Read`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Position in the forward-only transition order.
    pub fn rank(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }
}

/// A single chat message.
///
/// `sender_id`, `timestamp_millis` and `kind` are immutable once created.
/// Only the sender may change `content` (text messages only) or mark the
/// message deleted; anyone may advance `status` forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Store-generated push id; sorting by id reproduces insertion order.
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// Sender identity snapshot at send time.
    pub sender_display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_photo_url: Option<String>,
    /// Text, serialized location, or media URL depending on `kind`.
    pub content: String,
    pub kind: MessageKind,
    /// Server clock at append time.
    pub timestamp_millis: i64,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at_millis: Option<i64>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at_millis.is_some()
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis).single()
    }
}

/// The compact form of a message kept on the room record as
/// `last_message`, so the room list renders without loading message logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp_millis: i64,
}

impl From<&Message> for MessageSummary {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            sender_id: m.sender_id.clone(),
            content: m.content.clone(),
            kind: m.kind,
            timestamp_millis: m.timestamp_millis,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatRoom
// ---------------------------------------------------------------------------

/// A conversation container owning a participant set and message log.
///
/// Invariants: 2+ participants unique by id; `unread` keys equal the
/// participant id set; a participant's own counter resets to 0 exactly on
/// their `mark_read`, and every other participant's counter grows by
/// exactly 1 per message someone else sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRoom {
    pub id: RoomId,
    pub participants: Vec<ChatUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageSummary>,
    pub last_activity_millis: i64,
    /// Per-participant count of messages sent by others since that
    /// participant's last mark-read.
    #[serde(default)]
    pub unread: BTreeMap<UserId, u32>,
    pub created_at_millis: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pinned_message_ids: Vec<MessageId>,
}

impl ChatRoom {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| &p.id == user)
    }

    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.unread.get(user).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// A user's live online/offline state.  Exactly one record per user;
/// overwritten in place, last writer wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen_millis: i64,
}

impl PresenceRecord {
    pub fn last_seen_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.last_seen_millis).single()
    }
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

/// Ephemeral typing flag for one user in one room.
///
/// Never a durable fact: consumers must re-derive liveness from
/// `updated_at_millis` on every read, because a crashed writer leaves the
/// stored flag stuck at `true` forever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingRecord {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub updated_at_millis: i64,
}

impl TypingRecord {
    /// Whether this record still counts as "currently typing" at `now`.
    pub fn is_live(&self, now_millis: i64, ttl_millis: i64) -> bool {
        self.is_typing && now_millis - self.updated_at_millis <= ttl_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rank_is_forward_only() {
        assert!(MessageStatus::Sent.rank() < MessageStatus::Delivered.rank());
        assert!(MessageStatus::Delivered.rank() < MessageStatus::Read.rank());
    }

    #[test]
    fn test_room_unread_defaults_to_zero() {
        let room = ChatRoom {
            id: RoomId::new("r1"),
            participants: vec![ChatUser::new("a", "Alice")],
            last_message: None,
            last_activity_millis: 0,
            unread: BTreeMap::new(),
            created_at_millis: 0,
            pinned_message_ids: Vec::new(),
        };
        assert_eq!(room.unread_for(&UserId::new("a")), 0);
    }

    #[test]
    fn test_typing_record_liveness() {
        let record = TypingRecord {
            room_id: RoomId::new("r1"),
            user_id: UserId::new("u1"),
            is_typing: true,
            updated_at_millis: 1_000,
        };
        assert!(record.is_live(5_000, 10_000));
        assert!(!record.is_live(11_001, 10_000));

        let stopped = TypingRecord {
            is_typing: false,
            ..record
        };
        assert!(!stopped.is_live(1_001, 10_000));
    }

    #[test]
    fn test_utc_accessors() {
        let record = PresenceRecord {
            user_id: UserId::new("u1"),
            is_online: false,
            last_seen_millis: 1_700_000_000_000,
        };
        let seen = record.last_seen_utc().unwrap();
        assert_eq!(seen.timestamp_millis(), 1_700_000_000_000);

        // Out-of-range stamps yield None rather than a bogus date.
        let garbled = PresenceRecord {
            last_seen_millis: i64::MAX,
            ..record
        };
        assert!(garbled.last_seen_utc().is_none());

        let msg = Message {
            id: MessageId::new("m1"),
            room_id: RoomId::new("r1"),
            sender_id: UserId::new("u1"),
            sender_display_name: "Uma".to_string(),
            sender_photo_url: None,
            content: "hi".to_string(),
            kind: MessageKind::Text,
            timestamp_millis: 1_700_000_000_000,
            status: MessageStatus::Sent,
            reply_to: None,
            edited_at_millis: None,
            deleted_at_millis: None,
        };
        assert_eq!(
            msg.timestamp_utc().unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_message_roundtrips_through_json() {
        let msg = Message {
            id: MessageId::new("m1"),
            room_id: RoomId::new("r1"),
            sender_id: UserId::new("a"),
            sender_display_name: "Alice".to_string(),
            sender_photo_url: None,
            content: "hi".to_string(),
            kind: MessageKind::Text,
            timestamp_millis: 42,
            status: MessageStatus::Sent,
            reply_to: None,
            edited_at_millis: None,
            deleted_at_millis: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "text");
        assert_eq!(value["status"], "sent");
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
