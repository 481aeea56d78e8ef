//! Ephemeral typing indicators.
//!
//! A typing flag in the store is never trusted as-is: a writer that
//! crashes mid-burst leaves `is_typing: true` behind forever.  Liveness
//! is therefore re-derived from `updated_at_millis` against the TTL on
//! every read, and subscriptions arm a timer at the earliest upcoming
//! expiry so a viewer sees the indicator clear even when nothing else is
//! written.
//!
//! Like presence, typing writes are best-effort: transient store
//! failures are logged and swallowed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quartier_shared::{RoomId, UserId};
use quartier_store::{DurableStore, WatchHandle};

use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::models::TypingRecord;
use crate::paths;

/// Writes and reads the per-room typing flags.
#[derive(Clone)]
pub struct TypingBroadcaster {
    store: Arc<dyn DurableStore>,
    config: EngineConfig,
}

impl TypingBroadcaster {
    pub fn new(store: Arc<dyn DurableStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Write `user`'s typing flag for `room`, stamped with the server
    /// clock.
    pub async fn set_typing(&self, room: &RoomId, user: &UserId, is_typing: bool) -> Result<()> {
        paths::validate_id(room.as_str())?;
        paths::validate_id(user.as_str())?;

        let record = TypingRecord {
            room_id: room.clone(),
            user_id: user.clone(),
            is_typing,
            updated_at_millis: self.store.now_millis(),
        };
        let value = serde_json::to_value(&record).map_err(|e| ChatError::Internal(e.into()))?;
        match self.store.set(&paths::typing(room, user)?, value).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = ChatError::from(e);
                if !err.is_retryable() {
                    return Err(err);
                }
                warn!(room = %room, user = %user.short(), error = %err, "typing write dropped");
                Ok(())
            }
        }
    }

    /// Who is typing in `room` right now, from `viewer`'s point of view.
    ///
    /// Stale flags (older than the TTL) and the viewer's own flag are
    /// filtered out; the result is sorted for stable comparison.
    pub async fn typists(&self, room: &RoomId, viewer: &UserId) -> Result<Vec<UserId>> {
        let snapshot = self.store.get(&paths::typing_room(room)?).await?;
        let now = self.store.now_millis();
        Ok(live_typists(
            &decode_typing_map(snapshot),
            now,
            self.config.typing_ttl_millis,
            viewer,
        ))
    }

    /// Subscribe to the set of users typing in `room`.
    ///
    /// The callback fires with the initial set, then only when the set
    /// actually changes.  TTL expiries are delivered by an internal
    /// timer, so the indicator clears even if its writer never writes
    /// again.
    pub fn subscribe(
        &self,
        room: &RoomId,
        viewer: &UserId,
        callback: impl Fn(Vec<UserId>) + Send + Sync + 'static,
    ) -> Result<TypingSubscription> {
        let feed = Arc::new(TypingFeed {
            store: self.store.clone(),
            path: paths::typing_room(room)?,
            viewer: viewer.clone(),
            ttl_millis: self.config.typing_ttl_millis,
            callback: Box::new(callback),
            last: Mutex::new(None),
            timer: Mutex::new(None),
        });

        let on_change = feed.clone();
        let watch = self.store.watch(
            &feed.path,
            Arc::new(move |snapshot| on_change.deliver(snapshot)),
        );
        Ok(TypingSubscription { feed, watch })
    }
}

/// Shared state of one typing subscription.
struct TypingFeed {
    store: Arc<dyn DurableStore>,
    path: quartier_store::StorePath,
    viewer: UserId,
    ttl_millis: i64,
    callback: Box<dyn Fn(Vec<UserId>) + Send + Sync>,
    last: Mutex<Option<Vec<UserId>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TypingFeed {
    fn deliver(self: &Arc<Self>, snapshot: Option<Value>) {
        let now = self.store.now_millis();
        let records = decode_typing_map(snapshot);
        let live = live_typists(&records, now, self.ttl_millis, &self.viewer);

        let next_expiry = records
            .iter()
            .filter(|r| r.user_id != self.viewer && r.is_live(now, self.ttl_millis))
            .map(|r| r.updated_at_millis + self.ttl_millis)
            .min();

        {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if last.as_ref() != Some(&live) {
                *last = Some(live.clone());
                (self.callback)(live);
            }
        }
        self.rearm(next_expiry, now);
    }

    /// Schedule a re-derivation just past the earliest expiry, replacing
    /// any previously armed timer.
    fn rearm(self: &Arc<Self>, next_expiry: Option<i64>, now: i64) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        let Some(expiry) = next_expiry else {
            return;
        };

        let delay = Duration::from_millis((expiry - now).max(0) as u64 + 1);
        let feed = self.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match feed.store.get(&feed.path).await {
                Ok(snapshot) => feed.deliver(snapshot),
                Err(e) => debug!(error = %e, "typing expiry re-read failed"),
            }
        }));
    }

    fn shutdown(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = timer.take() {
            task.abort();
        }
    }
}

/// Active typing subscription; dropping it stops callbacks and the
/// expiry timer.
pub struct TypingSubscription {
    feed: Arc<TypingFeed>,
    watch: WatchHandle,
}

impl TypingSubscription {
    pub fn unsubscribe(&self) {
        self.watch.unsubscribe();
        self.feed.shutdown();
    }
}

impl Drop for TypingSubscription {
    fn drop(&mut self) {
        self.feed.shutdown();
    }
}

// ---------------------------------------------------------------------------
// TypingSession
// ---------------------------------------------------------------------------

/// Keystroke-level debounce for one user in one room.
///
/// Feed every keystroke to [`TypingSession::keystroke`]: the flag is
/// rebroadcast at most once per rebroadcast interval, and an idle timer
/// clears it automatically once keystrokes stop.  Call
/// [`TypingSession::blur`] when the composer loses focus.
pub struct TypingSession {
    broadcaster: TypingBroadcaster,
    room: RoomId,
    user: UserId,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    last_broadcast_millis: Option<i64>,
    idle_timer: Option<JoinHandle<()>>,
}

impl TypingSession {
    pub fn new(broadcaster: TypingBroadcaster, room: RoomId, user: UserId) -> Self {
        Self {
            broadcaster,
            room,
            user,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub async fn keystroke(&self) -> Result<()> {
        let now = self.broadcaster.store.now_millis();
        let interval = self.broadcaster.config.typing_rebroadcast_millis;

        let should_broadcast = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.last_broadcast_millis {
                Some(last) if now - last < interval => false,
                _ => {
                    state.last_broadcast_millis = Some(now);
                    true
                }
            }
        };
        if should_broadcast {
            self.broadcaster
                .set_typing(&self.room, &self.user, true)
                .await?;
        }
        self.reset_idle_timer();
        Ok(())
    }

    /// Composer lost focus: clear the flag immediately.
    pub async fn blur(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            state.last_broadcast_millis = None;
        }
        self.broadcaster
            .set_typing(&self.room, &self.user, false)
            .await
    }

    fn reset_idle_timer(&self) {
        let broadcaster = self.broadcaster.clone();
        let room = self.room.clone();
        let user = self.user.clone();
        let idle = Duration::from_millis(self.broadcaster.config.typing_idle_clear_millis.max(0) as u64);

        let task = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if let Err(e) = broadcaster.set_typing(&room, &user, false).await {
                debug!(error = %e, "idle typing clear failed");
            }
        });

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = state.idle_timer.replace(task) {
            previous.abort();
        }
    }
}

impl Drop for TypingSession {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn live_typists(records: &[TypingRecord], now: i64, ttl: i64, viewer: &UserId) -> Vec<UserId> {
    let mut live: Vec<UserId> = records
        .iter()
        .filter(|r| r.user_id != *viewer && r.is_live(now, ttl))
        .map(|r| r.user_id.clone())
        .collect();
    live.sort();
    live
}

fn decode_typing_map(snapshot: Option<Value>) -> Vec<TypingRecord> {
    let Some(Value::Object(map)) = snapshot else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(user, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(user = %user, error = %e, "skipping undecodable typing record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quartier_store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, TypingBroadcaster) {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = TypingBroadcaster::new(store.clone(), EngineConfig::default());
        (store, broadcaster)
    }

    fn room() -> RoomId {
        RoomId::new("r1")
    }

    #[tokio::test]
    async fn test_typists_filters_viewer_and_stale_flags() {
        let (store, typing) = setup();
        let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));

        typing.set_typing(&room(), &alice, true).await.unwrap();
        typing.set_typing(&room(), &bob, true).await.unwrap();

        assert_eq!(typing.typists(&room(), &alice).await.unwrap(), vec![bob.clone()]);
        assert_eq!(
            typing.typists(&room(), &UserId::new("carol")).await.unwrap(),
            vec![alice.clone(), bob.clone()]
        );

        // The writers crash; the stored flags stay true but expire.
        store.advance_clock(10_001);
        assert!(typing
            .typists(&room(), &UserId::new("carol"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_explicit_stop_clears_immediately() {
        let (_store, typing) = setup();
        let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));

        typing.set_typing(&room(), &bob, true).await.unwrap();
        typing.set_typing(&room(), &bob, false).await.unwrap();
        assert!(typing.typists(&room(), &alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_only_on_change() {
        let (_store, typing) = setup();
        let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));

        let seen: Arc<Mutex<Vec<Vec<UserId>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = typing
            .subscribe(&room(), &alice, move |typists| {
                sink.lock().unwrap().push(typists);
            })
            .unwrap();

        typing.set_typing(&room(), &bob, true).await.unwrap();
        // A refresh of the same flag changes the record but not the set.
        typing.set_typing(&room(), &bob, true).await.unwrap();
        typing.set_typing(&room(), &bob, false).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![Vec::new(), vec![bob.clone()], Vec::new()],
            "initial snapshot, then one delivery per set change"
        );
        drop(seen);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_subscription_timer_clears_expired_flag() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            typing_ttl_millis: 50,
            ..EngineConfig::default()
        };
        let typing = TypingBroadcaster::new(store.clone(), config);
        let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));

        let seen: Arc<Mutex<Vec<Vec<UserId>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = typing
            .subscribe(&room(), &alice, move |typists| {
                sink.lock().unwrap().push(typists);
            })
            .unwrap();

        typing.set_typing(&room(), &bob, true).await.unwrap();
        assert_eq!(seen.lock().unwrap().last().unwrap(), &vec![bob.clone()]);

        // No further writes: the expiry timer alone must clear the set.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(seen.lock().unwrap().last().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_debounces_rebroadcasts() {
        let (store, typing) = setup();
        let bob = UserId::new("bob");
        let session = TypingSession::new(typing.clone(), room(), bob.clone());

        async fn stamp(s: &MemoryStore, user: &UserId) -> i64 {
            let value = s
                .get(&paths::typing(&room(), user).unwrap())
                .await
                .unwrap()
                .unwrap();
            value["updated_at_millis"].as_i64().unwrap()
        }

        session.keystroke().await.unwrap();
        let first = typing.typists(&room(), &UserId::new("alice")).await.unwrap();
        assert_eq!(first, vec![bob.clone()]);
        let initial = stamp(&store, &bob).await;

        // Within the rebroadcast window nothing is rewritten.
        store.advance_clock(500);
        session.keystroke().await.unwrap();
        assert_eq!(stamp(&store, &bob).await, initial);

        // Past the window the flag is refreshed.
        store.advance_clock(2_000);
        session.keystroke().await.unwrap();
        assert!(stamp(&store, &bob).await > initial);

        session.blur().await.unwrap();
        assert!(typing
            .typists(&room(), &UserId::new("alice"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_session_idle_timer_clears_without_blur() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            typing_idle_clear_millis: 50,
            ..EngineConfig::default()
        };
        let typing = TypingBroadcaster::new(store.clone(), config);
        let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));
        let session = TypingSession::new(typing.clone(), room(), bob.clone());

        session.keystroke().await.unwrap();
        assert_eq!(typing.typists(&room(), &alice).await.unwrap(), vec![bob]);

        // No blur, no further keystrokes: the idle timer writes false.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(typing.typists(&room(), &alice).await.unwrap().is_empty());
    }
}
