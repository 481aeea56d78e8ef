/// Time-to-live for a stored typing flag in milliseconds.
///
/// A consumer must treat a typing record older than this as not-typing,
/// even if the stored flag is still `true` (the writer may have crashed
/// before sending the false transition).
pub const TYPING_TTL_MILLIS: i64 = 10_000;

/// Minimum interval between repeated `is_typing = true` writes during a
/// continuous keystroke burst, in milliseconds.
pub const TYPING_REBROADCAST_MILLIS: i64 = 2_000;

/// Idle time after the last keystroke before the client writes
/// `is_typing = false`, in milliseconds.
pub const TYPING_IDLE_CLEAR_MILLIS: i64 = 2_000;

/// Maximum attempts for a store transaction before giving up with a
/// conflict error.
pub const MAX_TRANSACTION_RETRIES: u32 = 10;

/// Default page size for message listing.
pub const DEFAULT_MESSAGE_PAGE_SIZE: usize = 50;

/// Maximum accepted text message length in bytes.
pub const MAX_MESSAGE_LEN: usize = 16_384;

/// Maximum accepted media blob size in bytes (50 MiB).
pub const MAX_BLOB_SIZE: usize = 50 * 1024 * 1024;
