//! The due-item store contract and its implementations.
//!
//! A store owns the transactional primitive that makes claiming safe: every
//! implementation must select eligible rows and move them to `processing` in
//! one step that no concurrent caller can interleave with.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{ItemId, NewItem, ScheduledItem, SchedulerError};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Parameters of one atomic claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimBatch {
    /// Time of the claim, recorded as `claimed_at`.
    pub now: DateTime<Utc>,
    /// Items due at or before this instant are eligible.
    pub horizon: DateTime<Utc>,
    /// Maximum number of items to claim.
    pub limit: usize,
}

/// Proof of a claim, required to move an item out of `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRef<'a> {
    pub id: &'a ItemId,
    pub token: Option<Uuid>,
}

impl<'a> From<&'a ScheduledItem> for ClaimRef<'a> {
    fn from(item: &'a ScheduledItem) -> Self {
        Self {
            id: &item.id,
            token: item.claim_token,
        }
    }
}

/// Storage backing the claim engine.
#[async_trait]
pub trait DueItemStore: Send + Sync {
    /// Insert a new item in `scheduled` state.
    async fn insert(&self, item: NewItem, now: DateTime<Utc>)
    -> Result<ScheduledItem, SchedulerError>;

    /// Fetch an item by id.
    async fn get(&self, id: &ItemId) -> Result<Option<ScheduledItem>, SchedulerError>;

    /// Atomically claim up to `batch.limit` eligible items, earliest due
    /// first (ties by id), and return them in that order.
    ///
    /// Each returned item is already durably `processing` with a fresh
    /// claim token and an incremented attempt count.
    async fn claim_due(&self, batch: ClaimBatch) -> Result<Vec<ScheduledItem>, SchedulerError>;

    /// Move a claimed item to `done`.
    async fn mark_done(&self, claim: ClaimRef<'_>, now: DateTime<Utc>)
    -> Result<(), SchedulerError>;

    /// Move a claimed item to `failed`, recording the error.
    async fn mark_failed(
        &self,
        claim: ClaimRef<'_>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError>;

    /// Return a claimed item to `scheduled` with a new due time.
    async fn requeue(
        &self,
        claim: ClaimRef<'_>,
        due_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError>;

    /// Reset every item processing since before `cutoff` back to `scheduled`.
    ///
    /// Returns the ids that were reset.
    async fn reset_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemId>, SchedulerError>;
}
