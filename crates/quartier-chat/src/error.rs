use thiserror::Error;

use quartier_store::StoreError;

/// Errors surfaced by the chat engine.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Bad input shape (too few participants, oversized content, malformed
    /// id).  Rejected before any store I/O, never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller may not perform this operation (edit/delete by a
    /// non-sender, acting in a room one is not part of).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Room or message id does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store I/O failure (offline, timeout).  Retryable; nothing was
    /// persisted.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A store transaction was retried past its attempt budget.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invariant breakage that is not the caller's fault.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transient(msg) => Self::Transient(msg),
            StoreError::Conflict { .. } => Self::Conflict(e.to_string()),
            StoreError::BlobTooLarge { .. } => Self::InvalidArgument(e.to_string()),
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl ChatError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Conflict(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
