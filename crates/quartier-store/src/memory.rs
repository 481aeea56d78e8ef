//! In-process implementation of [`DurableStore`].
//!
//! Keeps the whole store as one JSON tree behind a mutex.  Multi-path
//! updates are applied to a copy and swapped in, so readers and watchers
//! never observe a partially applied batch.  Watch callbacks are invoked
//! after the lock is released, each wrapped in `catch_unwind`, so a
//! panicking subscriber cannot poison the store or starve other watchers.
//!
//! Test hooks: [`MemoryStore::set_connected`] simulates an abrupt
//! transport drop (writes fail, registered on-disconnect hooks fire) and
//! [`MemoryStore::advance_clock`] moves the server clock forward.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Map;
use tracing::{debug, error, info};

use quartier_shared::constants::MAX_TRANSACTION_RETRIES;

use crate::error::{Result, StoreError};
use crate::path::StorePath;
use crate::push_id::PushIdGenerator;
use crate::store::{
    DisconnectHandle, DurableStore, Value, WatchCallback, WatchHandle, WriteOp,
};

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn value_at<'a>(tree: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = tree;
    for seg in path.segments() {
        node = node.as_object()?.get(seg)?;
    }
    Some(node)
}

/// Write `value` at `segments`, creating intermediate objects.  `Null`
/// deletes the target and prunes now-empty ancestors, matching how a
/// real-time database collapses empty nodes.
fn write_value(node: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Some(map) = node.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(first);
        } else {
            map.insert(first.clone(), value);
        }
        return;
    }

    let child = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    write_value(child, rest, value);
    if child.as_object().is_some_and(|m| m.is_empty()) {
        map.remove(first);
    }
}

fn apply_write(tree: &mut Value, path: &StorePath, op: &WriteOp, now_millis: i64) -> Result<()> {
    match op {
        WriteOp::Set(value) => {
            write_value(tree, path.segments(), value.clone());
            Ok(())
        }
        WriteOp::ServerTimestamp => {
            write_value(tree, path.segments(), Value::from(now_millis));
            Ok(())
        }
        WriteOp::Increment(delta) => {
            let current = match value_at(tree, path) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n.as_i64().ok_or(StoreError::NotAnInteger {
                    path: path.to_string(),
                })?,
                Some(_) => {
                    return Err(StoreError::NotAnInteger {
                        path: path.to_string(),
                    })
                }
            };
            write_value(tree, path.segments(), Value::from(current + delta));
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Store state
// ---------------------------------------------------------------------------

struct Watcher {
    path: StorePath,
    callback: WatchCallback,
}

struct State {
    /// The whole store as one JSON tree (always an object at the root).
    tree: Value,
    /// Bumped on every committed mutation; transactions use it to detect
    /// writes that slipped in between their read and their commit.
    version: u64,
    connected: bool,
    watchers: HashMap<u64, Watcher>,
    next_watcher_id: u64,
    hooks: HashMap<u64, Vec<(StorePath, WriteOp)>>,
    next_hook_id: u64,
}

struct Inner {
    state: Mutex<State>,
    ids: PushIdGenerator,
    /// Epoch millis when the store was created.
    epoch_base: i64,
    started: Instant,
    /// Manual clock adjustment (test hook), in millis.
    clock_skew: AtomicI64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_millis(&self) -> i64 {
        self.epoch_base
            + self.started.elapsed().as_millis() as i64
            + self.clock_skew.load(Ordering::Relaxed)
    }

    /// Collect the watchers affected by `written` paths, with the snapshot
    /// each should receive.  Caller must hold the lock.
    fn affected_watchers(
        state: &State,
        written: &[StorePath],
    ) -> Vec<(WatchCallback, Option<Value>)> {
        state
            .watchers
            .values()
            .filter(|w| written.iter().any(|p| w.path.overlaps(p)))
            .map(|w| {
                let snapshot = value_at(&state.tree, &w.path).cloned();
                (Arc::clone(&w.callback), snapshot)
            })
            .collect()
    }
}

/// Deliver snapshots outside the store lock, isolating panicking callbacks.
fn dispatch(notifications: Vec<(WatchCallback, Option<Value>)>) {
    for (callback, snapshot) in notifications {
        let result = catch_unwind(AssertUnwindSafe(|| callback(snapshot)));
        if result.is_err() {
            error!("watch callback panicked; other subscribers unaffected");
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`DurableStore`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let epoch_base = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    tree: Value::Object(Map::new()),
                    version: 0,
                    connected: true,
                    watchers: HashMap::new(),
                    next_watcher_id: 0,
                    hooks: HashMap::new(),
                    next_hook_id: 0,
                }),
                ids: PushIdGenerator::new(),
                epoch_base,
                started: Instant::now(),
                clock_skew: AtomicI64::new(0),
            }),
        }
    }

    /// Move the server clock forward (or backwards, for pathological-clock
    /// tests) by `millis`.
    pub fn advance_clock(&self, millis: i64) {
        self.inner.clock_skew.fetch_add(millis, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Simulate the transport going down or coming back.
    ///
    /// Going down fires every registered on-disconnect hook (the
    /// server-side cleanup a real store performs when a client vanishes)
    /// and makes subsequent operations fail with
    /// [`StoreError::Transient`] until reconnected.
    pub fn set_connected(&self, connected: bool) {
        let notifications = {
            let mut state = self.inner.lock();
            if state.connected == connected {
                return;
            }
            state.connected = connected;
            if connected {
                debug!("store reconnected");
                return;
            }

            let hooks: Vec<_> = state.hooks.drain().map(|(_, writes)| writes).collect();
            info!(hooks = hooks.len(), "store disconnected, firing hooks");

            let now = self.inner.now_millis();
            let mut written = Vec::new();
            for writes in hooks {
                let mut next = state.tree.clone();
                match writes
                    .iter()
                    .try_for_each(|(path, op)| apply_write(&mut next, path, op, now))
                {
                    Ok(()) => {
                        state.tree = next;
                        state.version += 1;
                        written.extend(writes.into_iter().map(|(path, _)| path));
                    }
                    Err(e) => error!(error = %e, "disconnect hook failed, skipped"),
                }
            }
            Inner::affected_watchers(&state, &written)
        };
        dispatch(notifications);
    }

    fn commit(&self, writes: Vec<(StorePath, WriteOp)>) -> Result<()> {
        let notifications = {
            let mut state = self.inner.lock();
            if !state.connected {
                return Err(StoreError::Transient("store is offline".to_string()));
            }

            // All-or-nothing: apply to a copy, swap on success.
            let now = self.inner.now_millis();
            let mut next = state.tree.clone();
            for (path, op) in &writes {
                apply_write(&mut next, path, op, now)?;
            }
            state.tree = next;
            state.version += 1;

            let written: Vec<_> = writes.into_iter().map(|(path, _)| path).collect();
            Inner::affected_watchers(&state, &written)
        };
        dispatch(notifications);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("connected", &state.connected)
            .field("watchers", &state.watchers.len())
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
        let state = self.inner.lock();
        if !state.connected {
            return Err(StoreError::Transient("store is offline".to_string()));
        }
        Ok(value_at(&state.tree, path).cloned())
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        self.update(vec![(path.clone(), WriteOp::Set(value))]).await
    }

    async fn update(&self, writes: Vec<(StorePath, WriteOp)>) -> Result<()> {
        self.commit(writes)
    }

    async fn transaction(
        &self,
        path: &StorePath,
        apply: &mut (dyn FnMut(Option<Value>) -> Option<Value> + Send),
    ) -> Result<Option<Value>> {
        for _attempt in 0..MAX_TRANSACTION_RETRIES {
            let (current, read_version) = {
                let state = self.inner.lock();
                if !state.connected {
                    return Err(StoreError::Transient("store is offline".to_string()));
                }
                (value_at(&state.tree, path).cloned(), state.version)
            };

            let Some(new_value) = apply(current) else {
                return Ok(None);
            };

            let notifications = {
                let mut state = self.inner.lock();
                if !state.connected {
                    return Err(StoreError::Transient("store is offline".to_string()));
                }
                if state.version != read_version {
                    // Someone committed in between; re-read and retry.
                    continue;
                }
                write_value(&mut state.tree, path.segments(), new_value.clone());
                state.version += 1;
                Inner::affected_watchers(&state, std::slice::from_ref(path))
            };
            dispatch(notifications);
            return Ok(Some(new_value));
        }

        Err(StoreError::Conflict {
            path: path.to_string(),
            attempts: MAX_TRANSACTION_RETRIES,
        })
    }

    fn watch(&self, path: &StorePath, callback: WatchCallback) -> WatchHandle {
        let (id, snapshot) = {
            let mut state = self.inner.lock();
            let id = state.next_watcher_id;
            state.next_watcher_id += 1;
            state.watchers.insert(
                id,
                Watcher {
                    path: path.clone(),
                    callback: Arc::clone(&callback),
                },
            );
            (id, value_at(&state.tree, path).cloned())
        };

        // Initial snapshot, delivered before any subsequent change.
        dispatch(vec![(callback, snapshot)]);

        let inner = Arc::clone(&self.inner);
        WatchHandle::new(move || {
            inner.lock().watchers.remove(&id);
        })
    }

    fn on_disconnect(&self, writes: Vec<(StorePath, WriteOp)>) -> Result<DisconnectHandle> {
        let mut state = self.inner.lock();
        if !state.connected {
            return Err(StoreError::Transient("store is offline".to_string()));
        }
        let id = state.next_hook_id;
        state.next_hook_id += 1;
        state.hooks.insert(id, writes);

        let inner = Arc::clone(&self.inner);
        Ok(DisconnectHandle::new(move || {
            inner.lock().hooks.remove(&id);
        }))
    }

    fn now_millis(&self) -> i64 {
        self.inner.now_millis()
    }

    fn generate_id(&self) -> String {
        self.inner.ids.next(self.now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> StorePath {
        StorePath::parse(s).unwrap()
    }

    fn recorder() -> (WatchCallback, Arc<Mutex<Vec<Option<Value>>>>) {
        let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: WatchCallback = Arc::new(move |snapshot| {
            sink.lock().unwrap().push(snapshot);
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        let p = path("rooms/r1/name");

        assert!(store.get(&p).await.unwrap().is_none());

        store.set(&p, json!("lobby")).await.unwrap();
        assert_eq!(store.get(&p).await.unwrap(), Some(json!("lobby")));

        // Parent read sees the nested object.
        let parent = store.get(&path("rooms/r1")).await.unwrap().unwrap();
        assert_eq!(parent, json!({ "name": "lobby" }));
    }

    #[tokio::test]
    async fn test_null_deletes_and_prunes() {
        let store = MemoryStore::new();
        store.set(&path("a/b/c"), json!(1)).await.unwrap();

        store.set(&path("a/b/c"), Value::Null).await.unwrap();
        assert!(store.get(&path("a/b/c")).await.unwrap().is_none());
        // Empty ancestors are collapsed.
        assert!(store.get(&path("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multi_path_update_is_atomic() {
        let store = MemoryStore::new();
        store.set(&path("x"), json!("not a number")).await.unwrap();

        // Batch with a bad increment: nothing from the batch lands.
        let result = store
            .update(vec![
                (path("y"), WriteOp::Set(json!(1))),
                (path("x"), WriteOp::Increment(1)),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::NotAnInteger { .. })));
        assert!(store.get(&path("y")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_from_missing_and_existing() {
        let store = MemoryStore::new();
        let p = path("counters/c");

        store
            .update(vec![(p.clone(), WriteOp::Increment(1))])
            .await
            .unwrap();
        assert_eq!(store.get(&p).await.unwrap(), Some(json!(1)));

        store
            .update(vec![(p.clone(), WriteOp::Increment(4))])
            .await
            .unwrap();
        assert_eq!(store.get(&p).await.unwrap(), Some(json!(5)));
    }

    #[tokio::test]
    async fn test_transaction_commit_and_abort() {
        let store = MemoryStore::new();
        let p = path("slot");

        let committed = store
            .transaction(&p, &mut |current| {
                assert!(current.is_none());
                Some(json!("claimed"))
            })
            .await
            .unwrap();
        assert_eq!(committed, Some(json!("claimed")));

        // Abort leaves the value untouched.
        let aborted = store.transaction(&p, &mut |_| None).await.unwrap();
        assert!(aborted.is_none());
        assert_eq!(store.get(&p).await.unwrap(), Some(json!("claimed")));
    }

    #[tokio::test]
    async fn test_watch_initial_snapshot_then_changes() {
        let store = MemoryStore::new();
        let p = path("presence/u1");
        store.set(&p, json!({ "online": true })).await.unwrap();

        let (callback, seen) = recorder();
        let handle = store.watch(&p, callback);

        store.set(&p, json!({ "online": false })).await.unwrap();

        {
            let events = seen.lock().unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0], Some(json!({ "online": true })));
            assert_eq!(events[1], Some(json!({ "online": false })));
        }

        handle.unsubscribe();
        handle.unsubscribe(); // idempotent
        store.set(&p, json!({ "online": true })).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_watch_parent_sees_child_writes() {
        let store = MemoryStore::new();
        let (callback, seen) = recorder();
        let _handle = store.watch(&path("typing/r1"), callback);

        store
            .set(&path("typing/r1/u2"), json!({ "is_typing": true }))
            .await
            .unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            Some(json!({ "u2": { "is_typing": true } }))
        );
    }

    #[tokio::test]
    async fn test_panicking_watcher_is_isolated() {
        let store = MemoryStore::new();
        let p = path("k");

        let panicking: WatchCallback = Arc::new(|_| panic!("subscriber bug"));
        let _bad = store.watch(&p, panicking);

        let (callback, seen) = recorder();
        let _good = store.watch(&p, callback);

        store.set(&p, json!(1)).await.unwrap();
        // Writer survived and the healthy watcher got both deliveries.
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_fires_hooks_and_fails_writes() {
        let store = MemoryStore::new();
        let p = path("presence/u1");
        store
            .set(&p, json!({ "is_online": true, "last_seen_millis": 1 }))
            .await
            .unwrap();

        let _hook = store
            .on_disconnect(vec![(
                p.clone(),
                WriteOp::Set(json!({ "is_online": false, "last_seen_millis": 2 })),
            )])
            .unwrap();

        store.set_connected(false);
        assert!(matches!(
            store.get(&p).await,
            Err(StoreError::Transient(_))
        ));
        assert!(matches!(
            store.set(&path("other"), json!(1)).await,
            Err(StoreError::Transient(_))
        ));

        store.set_connected(true);
        assert_eq!(
            store.get(&p).await.unwrap(),
            Some(json!({ "is_online": false, "last_seen_millis": 2 }))
        );
    }

    #[tokio::test]
    async fn test_cancelled_hook_does_not_fire() {
        let store = MemoryStore::new();
        let p = path("presence/u1");
        store.set(&p, json!({ "is_online": true })).await.unwrap();

        let hook = store
            .on_disconnect(vec![(p.clone(), WriteOp::Set(json!({ "is_online": false })))])
            .unwrap();
        hook.cancel();
        hook.cancel(); // idempotent

        store.set_connected(false);
        store.set_connected(true);
        assert_eq!(
            store.get(&p).await.unwrap(),
            Some(json!({ "is_online": true }))
        );
    }

    #[tokio::test]
    async fn test_hooks_fire_once_only() {
        let store = MemoryStore::new();
        let p = path("presence/u1");

        let _hook = store
            .on_disconnect(vec![(p.clone(), WriteOp::Increment(1))])
            .unwrap();

        store.set_connected(false);
        store.set_connected(true);
        assert_eq!(store.get(&p).await.unwrap(), Some(json!(1)));

        // Second drop without re-registration: hook is gone.
        store.set_connected(false);
        store.set_connected(true);
        assert_eq!(store.get(&p).await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_server_timestamp_stamps_apply_time() {
        let store = MemoryStore::new();
        let p = path("presence/u1/last_seen_millis");

        let _hook = store
            .on_disconnect(vec![(p.clone(), WriteOp::ServerTimestamp)])
            .unwrap();

        store.advance_clock(60_000);
        let fire_floor = store.now_millis();
        store.set_connected(false);
        store.set_connected(true);

        let stamped = store.get(&p).await.unwrap().unwrap().as_i64().unwrap();
        assert!(stamped >= fire_floor);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = MemoryStore::new();
        let p = path("counters/c");

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                let p = p.clone();
                tokio::spawn(async move {
                    store
                        .update(vec![(p, WriteOp::Increment(1))])
                        .await
                        .unwrap();
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        assert_eq!(store.get(&p).await.unwrap(), Some(json!(50)));
    }

    #[tokio::test]
    async fn test_clock_advances() {
        let store = MemoryStore::new();
        let before = store.now_millis();
        store.advance_clock(5_000);
        assert!(store.now_millis() >= before + 5_000);
    }

    #[tokio::test]
    async fn test_generated_ids_sort_across_clock_advance() {
        let store = MemoryStore::new();
        let a = store.generate_id();
        store.advance_clock(10);
        let b = store.generate_id();
        assert!(a < b);
    }
}
