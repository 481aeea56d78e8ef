//! # quartier-shared
//!
//! Identifier newtypes and protocol constants shared between the storage
//! boundary and the chat engine.  The surrounding application hands in a
//! verified user identity; everything here treats ids as opaque strings.

pub mod constants;
pub mod types;

pub use types::{MessageId, RoomId, UserId};
