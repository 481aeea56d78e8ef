//! Shared context wiring the engine components to one store.

use std::sync::Arc;

use quartier_shared::{RoomId, UserId};
use quartier_store::{BlobStore, DurableStore};

use crate::config::EngineConfig;
use crate::events::EventHub;
use crate::messages::MessageLog;
use crate::presence::PresenceTracker;
use crate::rooms::RoomRegistry;
use crate::typing::{TypingBroadcaster, TypingSession};

/// One handle to the whole engine.
///
/// Construct it once per store connection and share it; the presence
/// tracker in particular is stateful (it owns the per-user disconnect
/// hooks) and must not be duplicated per call site.
pub struct ChatContext {
    store: Arc<dyn DurableStore>,
    config: EngineConfig,
    rooms: RoomRegistry,
    messages: MessageLog,
    presence: PresenceTracker,
    typing: TypingBroadcaster,
    events: EventHub,
}

impl ChatContext {
    pub fn new(
        store: Arc<dyn DurableStore>,
        blobs: Arc<dyn BlobStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            rooms: RoomRegistry::new(store.clone()),
            messages: MessageLog::new(store.clone(), blobs, config.clone()),
            presence: PresenceTracker::new(store.clone()),
            typing: TypingBroadcaster::new(store.clone(), config.clone()),
            events: EventHub::new(store.clone()),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn typing(&self) -> &TypingBroadcaster {
        &self.typing
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// A debounced typing session for one composer.
    pub fn typing_session(&self, room: RoomId, user: UserId) -> TypingSession {
        TypingSession::new(self.typing.clone(), room, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatUser, MessageKind};
    use quartier_store::{MemoryBlobStore, MemoryStore};

    #[tokio::test]
    async fn test_end_to_end_conversation() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ChatContext::new(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            EngineConfig::default(),
        );
        let (alice, bob) = (ChatUser::new("alice", "Alice"), ChatUser::new("bob", "Bob"));
        let bob_id = UserId::new("bob");

        ctx.presence().start(&bob_id).await.unwrap();

        let room = ctx.rooms().create_room(&[alice.clone(), bob]).await.unwrap();
        let mut events = ctx.events().subscribe_messages(&room).unwrap();

        ctx.typing()
            .set_typing(&room, &alice.id, true)
            .await
            .unwrap();
        assert_eq!(
            ctx.typing().typists(&room, &bob_id).await.unwrap(),
            vec![alice.id.clone()]
        );

        let sent = ctx
            .messages()
            .send(&room, &alice, "bonjour", MessageKind::Text, None)
            .await
            .unwrap();
        assert!(events.recv().await.is_some());

        let record = ctx.rooms().get_room(&room).await.unwrap();
        assert_eq!(record.unread_for(&bob_id), 1);
        assert_eq!(record.last_message.unwrap().id, sent.id);

        ctx.rooms().mark_read(&room, &bob_id).await.unwrap();
        ctx.messages()
            .mark_read(&room, &[sent.id], &bob_id)
            .await
            .unwrap();
        let record = ctx.rooms().get_room(&room).await.unwrap();
        assert_eq!(record.unread_for(&bob_id), 0);

        ctx.presence().stop(&bob_id).await.unwrap();
    }
}
