//! The [`DurableStore`] trait and its handle types.
//!
//! This is the seam between the engine and whatever real-time database
//! backs it.  Real-time-database primitives (multi-path atomic updates,
//! transactional increments, change subscriptions, on-disconnect hooks,
//! a server clock) are expressed here as trait methods so the engine can
//! run against [`crate::MemoryStore`] in tests and against a networked
//! backend in production.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::path::StorePath;

/// Store values are JSON trees.
pub type Value = serde_json::Value;

/// A single write inside a multi-path [`DurableStore::update`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Replace the value at the path.  `Value::Null` deletes it.
    Set(Value),
    /// Server-side atomic add to the integer at the path (missing counts
    /// as zero).  This is what keeps unread counters consistent under
    /// concurrent sends without client-side locking.
    Increment(i64),
    /// Write the server clock (epoch millis) as of when the write is
    /// applied.  Inside an on-disconnect hook this stamps the actual
    /// moment the connection dropped, which no client-supplied value can.
    ServerTimestamp,
}

/// Callback invoked with the current snapshot under a watched path
/// (`None` when nothing exists there).
pub type WatchCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Handle for an active watch.  Unsubscribes on drop; calling
/// [`WatchHandle::unsubscribe`] repeatedly is safe.
pub struct WatchHandle {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl WatchHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stop receiving callbacks.  Idempotent.
    pub fn unsubscribe(&self) {
        let cancel = {
            let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

/// Handle for a registered on-disconnect hook.
///
/// Unlike [`WatchHandle`], dropping this does **not** cancel the hook:
/// presence cleanup must survive the registering task going away.  Call
/// [`DisconnectHandle::cancel`] for an explicit sign-off.
pub struct DisconnectHandle {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl DisconnectHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the hook server-side.  Idempotent.
    pub fn cancel(&self) {
        let cancel = {
            let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl std::fmt::Debug for DisconnectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisconnectHandle").finish_non_exhaustive()
    }
}

/// The hierarchical real-time store the engine writes through.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the snapshot under `path`.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Replace the value at `path`.
    async fn set(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Apply every write atomically: readers never observe a subset.
    async fn update(&self, writes: Vec<(StorePath, WriteOp)>) -> Result<()>;

    /// Bounded-retry read-modify-write on a single path.
    ///
    /// `apply` receives the current value and returns the replacement, or
    /// `None` to abort.  Returns the committed value (`None` if aborted).
    /// Exhausting the retry budget fails with [`crate::StoreError::Conflict`].
    async fn transaction(
        &self,
        path: &StorePath,
        apply: &mut (dyn FnMut(Option<Value>) -> Option<Value> + Send),
    ) -> Result<Option<Value>>;

    /// Subscribe to changes under `path`.
    ///
    /// The callback fires once immediately with the current snapshot, then
    /// on every change.  A panicking callback is isolated from other
    /// watchers and from the writer that triggered it.
    fn watch(&self, path: &StorePath, callback: WatchCallback) -> WatchHandle;

    /// Register writes applied server-side if the connection drops without
    /// an explicit sign-off.  Hooks fire once and are lost afterwards;
    /// callers must re-register after every reconnect.
    fn on_disconnect(&self, writes: Vec<(StorePath, WriteOp)>) -> Result<DisconnectHandle>;

    /// Server clock in epoch milliseconds.  Never the client clock, so
    /// `last_seen` / message timestamps are immune to client clock skew.
    fn now_millis(&self) -> i64;

    /// Generate a push id: unique and monotonically sortable (see
    /// [`crate::PushIdGenerator`]).
    fn generate_id(&self) -> String;
}
