//! Change subscriptions over the store, fanned out as typed events.
//!
//! Raw watch callbacks deliver whole JSON snapshots; this module turns
//! them into domain events on tokio channels.  Message subscriptions
//! diff each snapshot against the previously seen set, so consumers get
//! `Added` for new messages and `Changed` for edits, deletions, and
//! status advances.  Room subscriptions deliver the decoded record only
//! when it actually changed.
//!
//! Sends go through unbounded channels and drops are ignored, so a
//! consumer that went away can never stall a writer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use quartier_shared::{MessageId, RoomId, UserId};
use quartier_store::{DurableStore, WatchHandle};

use crate::error::Result;
use crate::messages::decode_message_map;
use crate::models::{ChatRoom, Message};
use crate::paths;
use crate::rooms::{decode_room_map, sort_rooms};

/// A change in a room's message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    /// A message not seen before on this subscription.
    Added(Message),
    /// A previously seen message whose record changed (edit, deletion
    /// mark, or status advance).
    Changed(Message),
}

/// A live event stream plus the watch keeping it fed.  Dropping it ends
/// the subscription.
pub struct EventSubscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    handle: WatchHandle,
}

impl<T> EventSubscription<T> {
    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`EventSubscription::recv`].
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

/// Creates typed subscriptions over the store.
#[derive(Clone)]
pub struct EventHub {
    store: Arc<dyn DurableStore>,
}

impl EventHub {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Events for one room's message log.  The initial snapshot arrives
    /// as `Added` events in `(timestamp_millis, id)` order.
    pub fn subscribe_messages(&self, room: &RoomId) -> Result<EventSubscription<MessageEvent>> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let known: Mutex<HashMap<MessageId, Message>> = Mutex::new(HashMap::new());

        let handle = self.store.watch(
            &paths::messages(room)?,
            Arc::new(move |snapshot| {
                let mut messages = decode_message_map(snapshot);
                messages.sort_by(|a, b| {
                    a.timestamp_millis
                        .cmp(&b.timestamp_millis)
                        .then_with(|| a.id.cmp(&b.id))
                });

                let mut known = known.lock().unwrap_or_else(|e| e.into_inner());
                for message in messages {
                    match known.get(&message.id) {
                        None => {
                            known.insert(message.id.clone(), message.clone());
                            let _ = tx.send(MessageEvent::Added(message));
                        }
                        Some(previous) if previous != &message => {
                            known.insert(message.id.clone(), message.clone());
                            let _ = tx.send(MessageEvent::Changed(message));
                        }
                        Some(_) => {}
                    }
                }
            }),
        );
        Ok(EventSubscription { receiver, handle })
    }

    /// The decoded room record, delivered on every actual change
    /// (`None` if the room does not exist or was removed).
    pub fn subscribe_room(&self, room: &RoomId) -> Result<EventSubscription<Option<ChatRoom>>> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let watched = room.clone();
        let last: Mutex<Option<Option<ChatRoom>>> = Mutex::new(None);

        let handle = self.store.watch(
            &paths::room(room)?,
            Arc::new(move |snapshot| {
                let current = match snapshot {
                    None => None,
                    Some(value) => match serde_json::from_value::<ChatRoom>(value) {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!(room = %watched, error = %e, "undecodable room record");
                            return;
                        }
                    },
                };
                let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
                if last.as_ref() != Some(&current) {
                    *last = Some(current.clone());
                    let _ = tx.send(current);
                }
            }),
        );
        Ok(EventSubscription { receiver, handle })
    }

    /// A user's room list, sorted by recency, re-delivered whenever the
    /// membership-filtered list changes.
    pub fn subscribe_rooms(&self, user: &UserId) -> Result<EventSubscription<Vec<ChatRoom>>> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let member = user.clone();
        let last: Mutex<Option<Vec<ChatRoom>>> = Mutex::new(None);

        let handle = self.store.watch(
            &paths::rooms()?,
            Arc::new(move |snapshot| {
                let mut rooms = decode_room_map(snapshot);
                rooms.retain(|room| room.is_participant(&member));
                sort_rooms(&mut rooms);

                let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
                if last.as_ref() != Some(&rooms) {
                    *last = Some(rooms.clone());
                    let _ = tx.send(rooms);
                }
            }),
        );
        Ok(EventSubscription { receiver, handle })
    }
}
