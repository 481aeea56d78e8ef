use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store is unreachable (offline, timeout, I/O failure).  Retryable.
    #[error("Store unreachable: {0}")]
    Transient(String),

    /// A transaction was retried past the bounded attempt count.
    #[error("Transaction on '{path}' gave up after {attempts} attempts")]
    Conflict { path: String, attempts: u32 },

    /// A path segment was empty or contained a separator.
    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    /// An increment targeted a value that is not an integer.
    #[error("Value at '{path}' is not an integer, cannot increment")]
    NotAnInteger { path: String },

    /// A blob exceeded the configured size cap.
    #[error("Blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
