//! The append-only per-room message log.
//!
//! `send` performs one atomic multi-path update: the message append, the
//! room's `last_message` / `last_activity_millis` refresh, and an
//! `Increment(1)` on every other participant's unread counter.  Readers
//! never observe the room summary without the matching unread increments,
//! and a transient failure persists nothing, so a caller can retry a
//! failed send without double-counting.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quartier_shared::{MessageId, RoomId, UserId};
use quartier_store::{BlobStore, DurableStore, WriteOp};

use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::models::{ChatUser, Message, MessageKind, MessageStatus, MessageSummary};
use crate::paths;
use crate::rooms::{encode, fetch_room};

/// Append, edit, soft-delete, and status tracking for room messages.
#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn DurableStore>,
    blobs: Arc<dyn BlobStore>,
    config: EngineConfig,
}

impl MessageLog {
    pub fn new(
        store: Arc<dyn DurableStore>,
        blobs: Arc<dyn BlobStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            config,
        }
    }

    /// Append a message and update the room bookkeeping atomically.
    pub async fn send(
        &self,
        room: &RoomId,
        sender: &ChatUser,
        content: impl Into<String>,
        kind: MessageKind,
        reply_to: Option<MessageId>,
    ) -> Result<Message> {
        let content = content.into();
        self.validate_content(&content)?;
        paths::validate_id(sender.id.as_str())?;

        let record = fetch_room(self.store.as_ref(), room).await?;
        if !record.is_participant(&sender.id) {
            return Err(ChatError::Unauthorized(format!(
                "{} is not a participant of room {room}",
                sender.id
            )));
        }

        let id = MessageId::new(self.store.generate_id());
        let now = self.store.now_millis();
        let message = Message {
            id: id.clone(),
            room_id: room.clone(),
            sender_id: sender.id.clone(),
            sender_display_name: sender.display_name.clone(),
            sender_photo_url: sender.photo_url.clone(),
            content,
            kind,
            timestamp_millis: now,
            status: MessageStatus::Sent,
            reply_to,
            edited_at_millis: None,
            deleted_at_millis: None,
        };

        let mut writes = vec![
            (
                paths::message(room, &id)?,
                WriteOp::Set(encode(&message)?),
            ),
            (
                paths::room_last_message(room)?,
                WriteOp::Set(encode(&MessageSummary::from(&message))?),
            ),
            (
                paths::room_last_activity(room)?,
                WriteOp::Set(Value::from(now)),
            ),
        ];
        for p in &record.participants {
            if p.id != sender.id {
                writes.push((paths::room_unread(room, &p.id)?, WriteOp::Increment(1)));
            }
        }

        self.store.update(writes).await?;
        info!(message = %id, room = %room, kind = ?kind, "sent message");
        Ok(message)
    }

    /// Upload media bytes, then send a [`MessageKind::Media`] message
    /// whose content is the blob URL.
    pub async fn send_media(
        &self,
        room: &RoomId,
        sender: &ChatUser,
        bytes: Bytes,
        file_name: &str,
    ) -> Result<Message> {
        // Check membership before uploading anything.
        let record = fetch_room(self.store.as_ref(), room).await?;
        if !record.is_participant(&sender.id) {
            return Err(ChatError::Unauthorized(format!(
                "{} is not a participant of room {room}",
                sender.id
            )));
        }

        let blob_path = format!("media/{room}/{}-{file_name}", Uuid::new_v4());
        let url = self.blobs.put(&blob_path, bytes).await?;
        debug!(room = %room, url = %url, "uploaded media blob");

        self.send(room, sender, url, MessageKind::Media, None).await
    }

    /// Replace the content of a text message.  Sender-only; the ordering
    /// position (`timestamp_millis`) never moves.
    pub async fn edit(
        &self,
        room: &RoomId,
        id: &MessageId,
        editor: &UserId,
        new_content: impl Into<String>,
    ) -> Result<()> {
        let new_content = new_content.into();
        self.validate_content(&new_content)?;

        let message = fetch_message(self.store.as_ref(), room, id).await?;
        if &message.sender_id != editor {
            return Err(ChatError::Unauthorized(format!(
                "{editor} cannot edit a message from {}",
                message.sender_id
            )));
        }
        if message.kind != MessageKind::Text {
            return Err(ChatError::InvalidArgument(
                "only text messages can be edited".to_string(),
            ));
        }
        if message.is_deleted() {
            return Err(ChatError::NotFound(format!("message {id} was deleted")));
        }

        let base = paths::message(room, id)?;
        self.store
            .update(vec![
                (base.child("content")?, WriteOp::Set(Value::from(new_content))),
                (base.child("edited_at_millis")?, WriteOp::ServerTimestamp),
            ])
            .await?;
        Ok(())
    }

    /// Mark a message deleted.  Sender-only and idempotent; the record
    /// stays in place so neighbors keep their ordering and pagination.
    pub async fn delete(&self, room: &RoomId, id: &MessageId, requester: &UserId) -> Result<()> {
        let message = fetch_message(self.store.as_ref(), room, id).await?;
        if &message.sender_id != requester {
            return Err(ChatError::Unauthorized(format!(
                "{requester} cannot delete a message from {}",
                message.sender_id
            )));
        }
        if message.is_deleted() {
            return Ok(());
        }

        let base = paths::message(room, id)?;
        self.store
            .update(vec![(
                base.child("deleted_at_millis")?,
                WriteOp::ServerTimestamp,
            )])
            .await?;
        Ok(())
    }

    /// Advance messages to `Delivered`.  Regressions and repeats are
    /// no-ops.
    pub async fn mark_delivered(&self, room: &RoomId, ids: &[MessageId]) -> Result<()> {
        for id in ids {
            self.transition(room, id, MessageStatus::Delivered, None)
                .await?;
        }
        Ok(())
    }

    /// Advance messages to `Read` on behalf of `reader`.  The reader's
    /// own messages are skipped; regressions and repeats are no-ops.
    pub async fn mark_read(
        &self,
        room: &RoomId,
        ids: &[MessageId],
        reader: &UserId,
    ) -> Result<()> {
        for id in ids {
            self.transition(room, id, MessageStatus::Read, Some(reader))
                .await?;
        }
        Ok(())
    }

    /// Forward-only status transition via a read-modify-write on the
    /// message record.  A missing id is skipped with a warning so bulk
    /// receipts survive a receipt for a just-deleted message.
    async fn transition(
        &self,
        room: &RoomId,
        id: &MessageId,
        target: MessageStatus,
        reader: Option<&UserId>,
    ) -> Result<()> {
        let path = paths::message(room, id)?;
        let mut missing = false;
        self.store
            .transaction(&path, &mut |current| {
                let Some(value) = current else {
                    missing = true;
                    return None;
                };
                let mut message: Message = serde_json::from_value(value).ok()?;
                if let Some(reader) = reader {
                    if &message.sender_id == reader {
                        return None; // own messages carry no read receipt
                    }
                }
                if target.rank() <= message.status.rank() {
                    return None; // already there or further along
                }
                message.status = target;
                serde_json::to_value(&message).ok()
            })
            .await?;
        if missing {
            warn!(room = %room, message = %id, "status receipt for unknown message, skipped");
        }
        Ok(())
    }

    /// Messages of a room in ascending `(timestamp_millis, id)` order.
    ///
    /// `before` pages backwards: the result is the `limit` messages
    /// immediately preceding it, still ascending.  Ties within one
    /// millisecond break by push id, i.e. insertion order, so repeated
    /// reads return the same sequence.
    pub async fn list(
        &self,
        room: &RoomId,
        limit: Option<usize>,
        before: Option<&MessageId>,
    ) -> Result<Vec<Message>> {
        // Surface NotFound for bogus room ids instead of an empty page.
        fetch_room(self.store.as_ref(), room).await?;

        let snapshot = self.store.get(&paths::messages(room)?).await?;
        let mut messages = decode_message_map(snapshot);
        messages.sort_by(|a, b| {
            a.timestamp_millis
                .cmp(&b.timestamp_millis)
                .then_with(|| a.id.cmp(&b.id))
        });

        if let Some(before) = before {
            messages.retain(|m| &m.id < before);
        }
        let limit = limit.unwrap_or(self.config.message_page_size);
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.is_empty() {
            return Err(ChatError::InvalidArgument(
                "empty message content".to_string(),
            ));
        }
        if content.len() > self.config.max_message_len {
            return Err(ChatError::InvalidArgument(format!(
                "message content of {} bytes exceeds the {} byte cap",
                content.len(),
                self.config.max_message_len
            )));
        }
        Ok(())
    }
}

pub(crate) async fn fetch_message(
    store: &dyn DurableStore,
    room: &RoomId,
    id: &MessageId,
) -> Result<Message> {
    let value = store
        .get(&paths::message(room, id)?)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("message {id} in room {room}")))?;
    serde_json::from_value(value).map_err(|e| ChatError::Internal(e.into()))
}

pub(crate) fn decode_message_map(snapshot: Option<Value>) -> Vec<Message> {
    let Some(Value::Object(map)) = snapshot else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(id, value)| match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(message = %id, error = %e, "skipping undecodable message record");
                None
            }
        })
        .collect()
}
