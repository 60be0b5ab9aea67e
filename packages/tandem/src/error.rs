//! Engine error taxonomy.

use tandem_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No partner arrived within the configured pairing window.
    #[error("pairing timed out")]
    PairingTimeout,

    /// A store operation failed. `StoreError::is_retryable` separates
    /// lost-race conflicts from terminal conditions.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record read back from the store did not have the expected shape.
    #[error("malformed store record: {0}")]
    Codec(#[from] serde_json::Error),
}
