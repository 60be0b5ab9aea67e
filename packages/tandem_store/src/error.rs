//! Store error taxonomy.

use crate::path::Path;

/// Errors surfaced by store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The string is not a valid store path (empty segment or stray `/`).
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// The client connection was severed; no further operations are allowed.
    #[error("store client is disconnected")]
    Disconnected,

    /// A guarded update found a precondition value that no longer holds.
    #[error("precondition failed at {path}")]
    PreconditionFailed { path: Path },

    /// The store side of a subscription is gone.
    #[error("subscription closed")]
    SubscriptionClosed,
}

impl StoreError {
    /// Whether the operation is worth re-evaluating and retrying.
    ///
    /// A failed precondition means a concurrent writer got there first; the
    /// caller can re-read and decide again. A severed connection is terminal
    /// for that client.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed { .. })
    }
}
