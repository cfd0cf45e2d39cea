//! Claim engine.
//!
//! Wraps a [`DueItemStore`] with input validation, the clock, timeouts, and
//! the stale-claim sweep that recovers items whose runner crashed while they
//! were `processing`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::{ClaimBatch, DueItemStore};
use crate::{ItemId, NewItem, ScheduledItem, SchedulerError};

/// Batch size used when a caller passes a limit of zero.
pub const DEFAULT_CLAIM_LIMIT: usize = 50;

/// Default age after which a `processing` claim is considered abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::minutes(15);

/// Claims due items and records their outcomes.
pub struct ClaimEngine<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    store_timeout: Option<StdDuration>,
}

impl<S: DueItemStore + ?Sized> ClaimEngine<S> {
    /// Create an engine over `store` using the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            stale_after: DEFAULT_STALE_AFTER,
            store_timeout: None,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set how long an item may stay `processing` before the sweep resets it.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Bound every store call. An expired call surfaces as `StoreUnavailable`.
    pub fn with_store_timeout(mut self, timeout: StdDuration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, SchedulerError>>,
    ) -> Result<T, SchedulerError> {
        match self.store_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                SchedulerError::StoreUnavailable(format!(
                    "{} timed out after {}ms",
                    op,
                    limit.as_millis()
                ))
            })?,
            None => fut.await,
        }
    }

    /// Add a new item to the store.
    pub async fn schedule(&self, item: NewItem) -> Result<ScheduledItem, SchedulerError> {
        let now = self.now();
        self.bounded("insert", self.store.insert(item, now)).await
    }

    /// Claim up to `limit` items due within `window` of now.
    ///
    /// Items come back earliest-due first and are already `processing`.
    /// Losing a race to another claimant yields an empty batch. A limit of
    /// zero means [`DEFAULT_CLAIM_LIMIT`]. A window reaching past the end of
    /// representable time claims everything due.
    #[tracing::instrument(skip(self), fields(window_secs = window.num_seconds()))]
    pub async fn claim(
        &self,
        window: Duration,
        limit: usize,
    ) -> Result<Vec<ScheduledItem>, SchedulerError> {
        if window <= Duration::zero() {
            return Err(SchedulerError::Validation(
                "claim window must be > 0".to_string(),
            ));
        }
        let limit = if limit == 0 { DEFAULT_CLAIM_LIMIT } else { limit };

        let now = self.now();
        let batch = ClaimBatch {
            now,
            horizon: now
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            limit,
        };

        match self.bounded("claim", self.store.claim_due(batch)).await {
            Ok(items) => {
                if !items.is_empty() {
                    info!(count = items.len(), "claimed due items");
                }
                Ok(items)
            }
            Err(SchedulerError::ClaimConflict) => {
                debug!("claim lost to a concurrent claimant");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Reset items stuck in `processing` longer than the staleness threshold.
    ///
    /// Returns the ids made claimable again.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_stale(&self) -> Result<Vec<ItemId>, SchedulerError> {
        let now = self.now();
        let cutoff = now
            .checked_sub_signed(self.stale_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let reset = self
            .bounded("reset_stale", self.store.reset_stale(cutoff, now))
            .await?;
        if !reset.is_empty() {
            warn!(count = reset.len(), ids = ?reset, "reset stale processing items");
        }
        Ok(reset)
    }

    /// Record a successful run.
    pub async fn complete(&self, item: &ScheduledItem) -> Result<(), SchedulerError> {
        let now = self.now();
        self.bounded("mark_done", self.store.mark_done(item.into(), now))
            .await
    }

    /// Record a permanent failure.
    pub async fn fail(&self, item: &ScheduledItem, error: &str) -> Result<(), SchedulerError> {
        let now = self.now();
        self.bounded(
            "mark_failed",
            self.store.mark_failed(item.into(), error, now),
        )
        .await
    }

    /// Put the item back in the queue, due `delay` from now.
    pub async fn requeue(
        &self,
        item: &ScheduledItem,
        delay: Duration,
        error: &str,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let now = self.now();
        let due_at = now.checked_add_signed(delay).ok_or_else(|| {
            SchedulerError::Validation(format!("requeue delay out of range: {}", delay))
        })?;
        self.bounded(
            "requeue",
            self.store.requeue(item.into(), due_at, error, now),
        )
        .await?;
        Ok(due_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::{ItemState, SqliteStore};
    use pretty_assertions::assert_eq;

    fn engine_at<S: DueItemStore>(store: S, now: DateTime<Utc>) -> (ClaimEngine<S>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let engine = ClaimEngine::new(Arc::new(store)).with_clock(clock.clone());
        (engine, clock)
    }

    async fn seed<S: DueItemStore + ?Sized>(engine: &ClaimEngine<S>, id: &str, due_at: DateTime<Utc>) {
        engine
            .schedule(NewItem::new(due_at, serde_json::json!({ "id": id })).with_id(id))
            .await
            .unwrap();
    }

    async fn scenario<S: DueItemStore>(store: S) {
        let t = Utc::now();
        let (engine, _clock) = engine_at(store, t);
        seed(&engine, "late-1", t + Duration::hours(2)).await;
        seed(&engine, "due-3", t - Duration::minutes(1)).await;
        seed(&engine, "due-1", t - Duration::minutes(10)).await;
        seed(&engine, "late-2", t + Duration::hours(2)).await;
        seed(&engine, "due-2", t - Duration::minutes(5)).await;

        let claimed = engine.claim(Duration::hours(1), 5).await.unwrap();
        let ids: Vec<&str> = claimed.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["due-1", "due-2", "due-3"]);

        for id in ["due-1", "due-2", "due-3"] {
            let item = engine.store().get(&ItemId::from(id)).await.unwrap().unwrap();
            assert_eq!(item.state, ItemState::Processing);
        }
        for id in ["late-1", "late-2"] {
            let item = engine.store().get(&ItemId::from(id)).await.unwrap().unwrap();
            assert_eq!(item.state, ItemState::Scheduled);
        }
    }

    #[tokio::test]
    async fn test_scenario_memory_store() {
        scenario(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_scenario_sqlite_store() {
        scenario(SqliteStore::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_window_boundary_is_inclusive() {
        let t = Utc::now();
        let (engine, _clock) = engine_at(MemoryStore::new(), t);
        seed(&engine, "edge", t + Duration::minutes(15)).await;
        seed(&engine, "past-edge", t + Duration::minutes(15) + Duration::milliseconds(1)).await;

        let claimed = engine.claim(Duration::minutes(15), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id.as_str(), "edge");
    }

    #[tokio::test]
    async fn test_huge_window_claims_everything_due() {
        let t = Utc::now();
        for store in [
            Arc::new(MemoryStore::new()) as Arc<dyn DueItemStore>,
            Arc::new(SqliteStore::open_in_memory().unwrap()) as Arc<dyn DueItemStore>,
        ] {
            let engine = ClaimEngine::new(store).with_clock(Arc::new(ManualClock::new(t)));
            seed(&engine, "soon", t + Duration::hours(1)).await;
            seed(&engine, "far", t + Duration::days(365 * 100)).await;

            let claimed = engine
                .claim(Duration::days(365 * 300_000), 5)
                .await
                .unwrap();
            let ids: Vec<&str> = claimed.iter().map(|i| i.id.as_str()).collect();
            assert_eq!(ids, vec!["soon", "far"]);
        }
    }

    #[tokio::test]
    async fn test_requeue_past_end_of_time_is_rejected() {
        let t = Utc::now();
        let (engine, _clock) = engine_at(MemoryStore::new(), t);
        seed(&engine, "a", t).await;

        let claimed = engine.claim(Duration::minutes(1), 1).await.unwrap();
        assert!(matches!(
            engine
                .requeue(&claimed[0], Duration::days(365 * 300_000), "later")
                .await,
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            engine.store().get(&ItemId::from("a")).await.unwrap().unwrap().state,
            ItemState::Processing
        ));
    }

    #[tokio::test]
    async fn test_invalid_window_rejected() {
        let (engine, _clock) = engine_at(MemoryStore::new(), Utc::now());
        assert!(matches!(
            engine.claim(Duration::zero(), 5).await,
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            engine.claim(Duration::minutes(-5), 5).await,
            Err(SchedulerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_limit_uses_default() {
        let t = Utc::now();
        let (engine, _clock) = engine_at(MemoryStore::new(), t);
        for i in 0..(DEFAULT_CLAIM_LIMIT + 5) {
            seed(&engine, &format!("item-{:03}", i), t).await;
        }
        let claimed = engine.claim(Duration::minutes(1), 0).await.unwrap();
        assert_eq!(claimed.len(), DEFAULT_CLAIM_LIMIT);
    }

    #[tokio::test]
    async fn test_empty_store_is_not_an_error() {
        let (engine, _clock) = engine_at(MemoryStore::new(), Utc::now());
        assert!(engine.claim(Duration::hours(1), 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_reported_as_empty_batch() {
        let t = Utc::now();
        let (engine, _clock) = engine_at(MemoryStore::new(), t);
        seed(&engine, "a", t).await;

        engine.store().conflict_next_claim();
        assert!(engine.claim(Duration::hours(1), 5).await.unwrap().is_empty());
        assert_eq!(engine.claim(Duration::hours(1), 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_unavailable_is_returned() {
        let (engine, _clock) = engine_at(MemoryStore::new(), Utc::now());
        engine.store().set_unavailable(true);

        let err = engine.claim(Duration::hours(1), 5).await.unwrap_err();
        assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_sweep_recovers_crashed_claim() {
        let t = Utc::now();
        let (engine, clock) = engine_at(MemoryStore::new(), t);
        seed(&engine, "a", t).await;

        // A runner claims the item and then disappears.
        let crashed = engine.claim(Duration::minutes(1), 5).await.unwrap();
        assert_eq!(crashed.len(), 1);
        assert!(engine.claim(Duration::minutes(1), 5).await.unwrap().is_empty());

        // Not yet stale.
        clock.advance(Duration::minutes(10));
        assert!(engine.sweep_stale().await.unwrap().is_empty());

        clock.advance(Duration::minutes(10));
        assert_eq!(engine.sweep_stale().await.unwrap(), vec![ItemId::from("a")]);

        let recovered = engine.claim(Duration::minutes(1), 5).await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id.as_str(), "a");
        assert_eq!(recovered[0].attempts, 2);

        // The crashed runner's late completion is rejected.
        assert!(matches!(
            engine.complete(&crashed[0]).await,
            Err(SchedulerError::ClaimLost(_))
        ));
        engine.complete(&recovered[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_stale_threshold() {
        let t = Utc::now();
        let clock = Arc::new(ManualClock::new(t));
        let engine = ClaimEngine::new(Arc::new(MemoryStore::new()))
            .with_clock(clock.clone())
            .with_stale_after(Duration::seconds(30));
        seed(&engine, "a", t).await;

        engine.claim(Duration::minutes(1), 1).await.unwrap();
        clock.advance(Duration::seconds(31));
        assert_eq!(engine.sweep_stale().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_returns_new_due_time() {
        let t = Utc::now();
        let (engine, clock) = engine_at(MemoryStore::new(), t);
        seed(&engine, "a", t).await;

        let claimed = engine.claim(Duration::minutes(1), 1).await.unwrap();
        let due_at = engine
            .requeue(&claimed[0], Duration::minutes(5), "429 rate limited")
            .await
            .unwrap();
        assert_eq!(due_at, t + Duration::minutes(5));

        assert!(engine.claim(Duration::minutes(1), 1).await.unwrap().is_empty());
        clock.advance(Duration::minutes(5));
        assert_eq!(engine.claim(Duration::minutes(1), 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_records_error() {
        let t = Utc::now();
        let (engine, _clock) = engine_at(MemoryStore::new(), t);
        seed(&engine, "a", t).await;

        let claimed = engine.claim(Duration::minutes(1), 1).await.unwrap();
        engine.fail(&claimed[0], "unknown platform: myspace").await.unwrap();

        let item = engine.store().get(&ItemId::from("a")).await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::Failed);
        assert_eq!(item.last_error.as_deref(), Some("unknown platform: myspace"));
    }

    struct StallingStore(MemoryStore);

    #[async_trait::async_trait]
    impl DueItemStore for StallingStore {
        async fn insert(
            &self,
            item: NewItem,
            now: DateTime<Utc>,
        ) -> Result<ScheduledItem, SchedulerError> {
            self.0.insert(item, now).await
        }
        async fn get(&self, id: &ItemId) -> Result<Option<ScheduledItem>, SchedulerError> {
            self.0.get(id).await
        }
        async fn claim_due(&self, batch: ClaimBatch) -> Result<Vec<ScheduledItem>, SchedulerError> {
            tokio::time::sleep(StdDuration::from_secs(60)).await;
            self.0.claim_due(batch).await
        }
        async fn mark_done(
            &self,
            claim: crate::ClaimRef<'_>,
            now: DateTime<Utc>,
        ) -> Result<(), SchedulerError> {
            self.0.mark_done(claim, now).await
        }
        async fn mark_failed(
            &self,
            claim: crate::ClaimRef<'_>,
            error: &str,
            now: DateTime<Utc>,
        ) -> Result<(), SchedulerError> {
            self.0.mark_failed(claim, error, now).await
        }
        async fn requeue(
            &self,
            claim: crate::ClaimRef<'_>,
            due_at: DateTime<Utc>,
            error: &str,
            now: DateTime<Utc>,
        ) -> Result<(), SchedulerError> {
            self.0.requeue(claim, due_at, error, now).await
        }
        async fn reset_stale(
            &self,
            cutoff: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<Vec<ItemId>, SchedulerError> {
            self.0.reset_stale(cutoff, now).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_surfaces_as_unavailable() {
        let engine = ClaimEngine::new(Arc::new(StallingStore(MemoryStore::new())))
            .with_store_timeout(StdDuration::from_secs(2));

        let err = engine.claim(Duration::hours(1), 5).await.unwrap_err();
        assert!(matches!(err, SchedulerError::StoreUnavailable(msg) if msg.contains("timed out")));
    }
}
