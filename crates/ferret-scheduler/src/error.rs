//! Error types for the scheduler.

use thiserror::Error;

use crate::ItemId;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed input to a public operation. Never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The backing store could not be reached. Retry with backoff.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A concurrent claimant holds the store's write lock.
    ///
    /// The claim engine reports this as an empty batch.
    #[error("claim conflict: another claimant won the race")]
    ClaimConflict,

    /// Item not found.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// The caller's claim is no longer current (the item was reclaimed by the
    /// stale sweep, or already reached another state).
    #[error("claim lost for item {0}")]
    ClaimLost(ItemId),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Whether the caller should retry the operation after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::ClaimConflict)
    }
}
