//! Online/offline presence with disconnect detection.
//!
//! The tracker pairs every "I am online" write with a server-side
//! on-disconnect hook, so a killed process or dropped link still flips
//! the user offline and stamps `last_seen_millis` with the server clock
//! at the moment the connection actually died.
//!
//! Presence is best-effort: a transient store failure is logged and
//! swallowed rather than surfaced, because a chat session must not die
//! just because an availability dot could not be refreshed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use quartier_shared::UserId;
use quartier_store::{DisconnectHandle, DurableStore, WatchHandle, WriteOp};

use crate::error::{ChatError, Result};
use crate::models::PresenceRecord;
use crate::paths;

/// Tracks which users are online and keeps one disconnect hook per user.
pub struct PresenceTracker {
    store: Arc<dyn DurableStore>,
    sessions: Mutex<HashMap<UserId, DisconnectHandle>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Mark `user` online and arm the offline fallback.
    ///
    /// Re-starting an already-started user replaces its hook, so after a
    /// reconnect callers simply call `start` again.  At most one hook per
    /// user is ever live.
    pub async fn start(&self, user: &UserId) -> Result<()> {
        paths::validate_id(user.as_str())?;
        let base = paths::presence(user)?;

        // The hook writes a complete record: it can fire before any
        // online write lands.
        let hook = self.store.on_disconnect(vec![
            (
                base.child("user_id")?,
                WriteOp::Set(Value::from(user.as_str())),
            ),
            (base.child("is_online")?, WriteOp::Set(Value::from(false))),
            (base.child("last_seen_millis")?, WriteOp::ServerTimestamp),
        ]);
        match hook {
            Ok(handle) => {
                let previous = {
                    let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                    sessions.insert(user.clone(), handle)
                };
                if let Some(previous) = previous {
                    previous.cancel();
                }
            }
            Err(e) => {
                let err = ChatError::from(e);
                if !err.is_retryable() {
                    return Err(err);
                }
                warn!(user = %user.short(), error = %err, "could not arm disconnect hook");
            }
        }

        let online = self
            .store
            .update(vec![
                (
                    base.child("user_id")?,
                    WriteOp::Set(Value::from(user.as_str())),
                ),
                (base.child("is_online")?, WriteOp::Set(Value::from(true))),
                (base.child("last_seen_millis")?, WriteOp::ServerTimestamp),
            ])
            .await;
        self.note_best_effort(user, online, "presence online write")?;
        debug!(user = %user.short(), "presence started");
        Ok(())
    }

    /// Explicit sign-off: cancel the hook and mark `user` offline now.
    pub async fn stop(&self, user: &UserId) -> Result<()> {
        paths::validate_id(user.as_str())?;

        let handle = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(user)
        };
        if let Some(handle) = handle {
            handle.cancel();
        }

        let base = paths::presence(user)?;
        let offline = self
            .store
            .update(vec![
                (base.child("is_online")?, WriteOp::Set(Value::from(false))),
                (base.child("last_seen_millis")?, WriteOp::ServerTimestamp),
            ])
            .await;
        self.note_best_effort(user, offline, "presence offline write")?;
        debug!(user = %user.short(), "presence stopped");
        Ok(())
    }

    /// Watch a user's presence record.  The callback fires immediately
    /// with the current state (`None` if the user was never seen), then
    /// on every change.
    pub fn subscribe(
        &self,
        user: &UserId,
        callback: impl Fn(Option<PresenceRecord>) + Send + Sync + 'static,
    ) -> Result<WatchHandle> {
        paths::validate_id(user.as_str())?;
        let watched = user.clone();
        Ok(self.store.watch(
            &paths::presence(user)?,
            Arc::new(move |snapshot| match snapshot {
                None => callback(None),
                Some(value) => match serde_json::from_value::<PresenceRecord>(value) {
                    Ok(record) => callback(Some(record)),
                    Err(e) => {
                        warn!(user = %watched.short(), error = %e, "undecodable presence record");
                    }
                },
            }),
        ))
    }

    fn note_best_effort(
        &self,
        user: &UserId,
        result: quartier_store::Result<()>,
        what: &str,
    ) -> Result<()> {
        if let Err(e) = result {
            let err = ChatError::from(e);
            if !err.is_retryable() {
                return Err(err);
            }
            warn!(user = %user.short(), error = %err, "{what} failed, will recover on reconnect");
        }
        Ok(())
    }
}
