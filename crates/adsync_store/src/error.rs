//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entity exists under the given key.
    #[error("entity not found: {key}")]
    EntityNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// No placement exists under the given key.
    #[error("placement not found: {key}")]
    PlacementNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The record violates the remote-id/state invariant.
    #[error("invariant violation for {key}: remote_id must be set iff state is remote-backed")]
    InvariantViolation {
        /// The offending record's key.
        key: String,
    },

    /// The backend is unreachable. This is the only store error treated
    /// as fatal (run-aborting) by the engine.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity failure.
        message: String,
    },
}
