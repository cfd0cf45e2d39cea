//! In-process store guarded by a single async mutex.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ClaimBatch, ClaimRef, DueItemStore};
use crate::{ItemId, ItemState, NewItem, ScheduledItem, SchedulerError};

/// A due-item store kept in memory.
///
/// The whole table sits behind one mutex, so selection and transition in
/// `claim_due` happen under a single lock acquisition. Intended for tests and
/// single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<ItemId, ScheduledItem>>,
    unavailable: AtomicBool,
    conflict_next_claim: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreUnavailable` until cleared.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next claim report a lost race.
    #[cfg(any(test, feature = "test-util"))]
    pub fn conflict_next_claim(&self) {
        self.conflict_next_claim.store(true, Ordering::SeqCst);
    }

    /// Snapshot of all items, ordered by id.
    pub async fn snapshot(&self) -> Vec<ScheduledItem> {
        self.items.lock().await.values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), SchedulerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `f` to a claimed item if `claim` is still current.
    async fn transition(
        &self,
        claim: ClaimRef<'_>,
        f: impl FnOnce(&mut ScheduledItem),
    ) -> Result<(), SchedulerError> {
        self.check_available()?;
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(claim.id)
            .ok_or_else(|| SchedulerError::ItemNotFound(claim.id.clone()))?;
        if !item.holds_claim(claim.token) {
            return Err(SchedulerError::ClaimLost(claim.id.clone()));
        }
        f(item);
        item.claim_token = None;
        Ok(())
    }
}

#[async_trait]
impl DueItemStore for MemoryStore {
    async fn insert(
        &self,
        item: NewItem,
        now: DateTime<Utc>,
    ) -> Result<ScheduledItem, SchedulerError> {
        self.check_available()?;
        let item = item.into_item(now);
        let mut items = self.items.lock().await;
        if items.contains_key(&item.id) {
            return Err(SchedulerError::Validation(format!(
                "item already exists: {}",
                item.id
            )));
        }
        items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn get(&self, id: &ItemId) -> Result<Option<ScheduledItem>, SchedulerError> {
        self.check_available()?;
        Ok(self.items.lock().await.get(id).cloned())
    }

    async fn claim_due(&self, batch: ClaimBatch) -> Result<Vec<ScheduledItem>, SchedulerError> {
        self.check_available()?;
        if self.conflict_next_claim.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::ClaimConflict);
        }

        let mut items = self.items.lock().await;

        let mut eligible: Vec<(DateTime<Utc>, ItemId)> = items
            .values()
            .filter(|item| item.is_claimable(batch.horizon))
            .map(|item| (item.due_at, item.id.clone()))
            .collect();
        eligible.sort();
        eligible.truncate(batch.limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, id) in eligible {
            if let Some(item) = items.get_mut(&id) {
                item.state = ItemState::Processing;
                item.claim_token = Some(Uuid::new_v4());
                item.claimed_at = Some(batch.now);
                item.attempts += 1;
                item.updated_at = batch.now;
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_done(
        &self,
        claim: ClaimRef<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.transition(claim, |item| {
            item.state = ItemState::Done;
            item.last_error = None;
            item.updated_at = now;
        })
        .await
    }

    async fn mark_failed(
        &self,
        claim: ClaimRef<'_>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.transition(claim, |item| {
            item.state = ItemState::Failed;
            item.last_error = Some(error.to_string());
            item.updated_at = now;
        })
        .await
    }

    async fn requeue(
        &self,
        claim: ClaimRef<'_>,
        due_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.transition(claim, |item| {
            item.state = ItemState::Scheduled;
            item.due_at = due_at;
            item.claimed_at = None;
            item.last_error = Some(error.to_string());
            item.updated_at = now;
        })
        .await
    }

    async fn reset_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemId>, SchedulerError> {
        self.check_available()?;
        let mut items = self.items.lock().await;
        let mut reset = Vec::new();
        for item in items.values_mut().filter(|item| item.is_stale(cutoff)) {
            item.state = ItemState::Scheduled;
            item.claim_token = None;
            item.claimed_at = None;
            item.updated_at = now;
            reset.push(item.id.clone());
        }
        Ok(reset)
    }
}
