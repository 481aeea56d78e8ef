//! # quartier-store
//!
//! The durable store boundary of the messaging engine.
//!
//! The engine never talks to a concrete database; it goes through the
//! [`DurableStore`] trait, which models a hierarchical real-time store:
//! keyed get/set, atomic multi-path updates with transactional increments,
//! bounded-retry read-modify-write transactions, change subscriptions, and
//! server-side on-disconnect hooks.  [`MemoryStore`] is the in-process
//! implementation used by tests and by embedders that want a local backend.
//!
//! Media bytes go through the separate [`BlobStore`] trait.

pub mod blob;
pub mod memory;
pub mod path;
pub mod push_id;
pub mod store;

mod error;

pub use blob::{BlobStore, MemoryBlobStore};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use path::StorePath;
pub use push_id::PushIdGenerator;
pub use store::{
    DisconnectHandle, DurableStore, Value, WatchCallback, WatchHandle, WriteOp,
};
