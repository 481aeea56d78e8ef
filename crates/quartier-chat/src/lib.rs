//! Quartier chat engine: rooms, messages, presence, and typing state
//! synchronized through a real-time durable store.
//!
//! The engine is backend-agnostic: everything goes through the
//! [`quartier_store::DurableStore`] trait, so the same code runs against
//! the in-memory store in tests and a networked store in production.
//! Entry point is [`ChatContext`].

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod messages;
pub mod models;
pub mod paths;
pub mod presence;
pub mod rooms;
pub mod typing;

pub use config::EngineConfig;
pub use context::ChatContext;
pub use error::{ChatError, Result};
pub use events::{EventHub, EventSubscription, MessageEvent};
pub use messages::MessageLog;
pub use models::{
    ChatRoom, ChatUser, Message, MessageKind, MessageStatus, MessageSummary, PresenceRecord,
    TypingRecord,
};
pub use presence::PresenceTracker;
pub use rooms::RoomRegistry;
pub use typing::{TypingBroadcaster, TypingSession, TypingSubscription};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to debug for the engine crates and warn
/// for everything else.  Call once from the embedding binary.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quartier_chat=debug,quartier_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
