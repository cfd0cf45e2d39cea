//! Per-platform publish pacing.
//!
//! Each platform gets a budget of `n` posts per window. Up to `n` posts go
//! out at once; after that one more is allowed every `window / n`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::{Platform, Post, Publication, Publisher, UpstreamError};

/// Posts per window for platforms without their own rate.
pub const DEFAULT_RATE: u32 = 2;
/// Window the rates apply to.
pub const DEFAULT_PACING_WINDOW: Duration = Duration::from_secs(1);

/// Budget for one platform.
#[derive(Debug)]
struct Limiter {
    interval: Duration,
    burst: Duration,
    /// Earliest instant the budget is fully spent until.
    next: Mutex<Option<Instant>>,
}

impl Limiter {
    fn new(rate: u32, window: Duration) -> Self {
        let rate = rate.max(1);
        let interval = window / rate;
        Self {
            interval,
            burst: window.saturating_sub(interval),
            next: Mutex::new(None),
        }
    }

    /// Reserve a slot and wait for it.
    async fn acquire(&self) -> Duration {
        let slot = {
            let mut next = self.next.lock().await;
            let now = Instant::now();
            let tat = next.map_or(now, |t| t.max(now));
            let slot = tat
                .checked_sub(self.burst)
                .map_or(now, |earliest| earliest.max(now));
            *next = Some(tat.max(slot) + self.interval);
            slot
        };
        let now = Instant::now();
        let waited = slot.saturating_duration_since(now);
        if !waited.is_zero() {
            tokio::time::sleep_until(slot).await;
        }
        waited
    }
}

/// Per-platform rate limits shared by every publish.
#[derive(Debug)]
pub struct Pacer {
    limiters: BTreeMap<Platform, Limiter>,
    fallback: Limiter,
}

impl Pacer {
    /// `rates` gives posts per `window` for specific platforms; every other
    /// platform gets [`DEFAULT_RATE`]. A rate of zero counts as one.
    pub fn new(rates: &BTreeMap<Platform, u32>, window: Duration) -> Self {
        Self {
            limiters: rates
                .iter()
                .map(|(platform, rate)| (*platform, Limiter::new(*rate, window)))
                .collect(),
            fallback: Limiter::new(DEFAULT_RATE, window),
        }
    }

    /// Wait until `platform` may publish again.
    pub async fn wait(&self, platform: Platform) {
        let limiter = self.limiters.get(&platform).unwrap_or(&self.fallback);
        let waited = limiter.acquire().await;
        if !waited.is_zero() {
            debug!(platform = %platform, waited_ms = waited.as_millis() as u64, "paced publish");
        }
    }
}

/// A publisher that waits for its platform's budget before each publish.
pub struct PacedPublisher {
    inner: Arc<dyn Publisher>,
    pacer: Arc<Pacer>,
}

impl PacedPublisher {
    pub fn new(inner: Arc<dyn Publisher>, pacer: Arc<Pacer>) -> Self {
        Self { inner, pacer }
    }
}

#[async_trait]
impl Publisher for PacedPublisher {
    async fn publish(&self, platform: Platform, post: &Post) -> Result<Publication, UpstreamError> {
        self.pacer.wait(platform).await;
        self.inner.publish(platform, post).await
    }
}
