//! Periodic triggers.
//!
//! A trigger runs an async action on its own tokio task: once as soon as the
//! task is first polled, then once per interval until cancelled. The task
//! awaits every invocation before looking at the clock again, so invocations
//! never overlap; ticks that pass while an invocation is running are skipped
//! rather than queued.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::SchedulerError;

/// Starts periodic actions.
pub struct Trigger;

impl Trigger {
    /// Start running `action` now and then every `interval`.
    ///
    /// Returns immediately; the first invocation happens on the spawned task.
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(interval: Duration, mut action: F) -> Result<TriggerHandle, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(SchedulerError::Validation(
                "trigger interval must be > 0".to_string(),
            ));
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            // Ticks are aligned to the start time, not to the end of the
            // first invocation.
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            if *cancel_rx.borrow() {
                return;
            }
            action().await;

            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed() => {
                        // A closed channel means the handle is gone.
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                        action().await;
                    }
                }
            }
            debug!("trigger stopped");
        });

        Ok(TriggerHandle {
            cancel_tx,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Cancellation handle for a running trigger.
///
/// Dropping the handle stops the trigger without waiting for it.
pub struct TriggerHandle {
    cancel_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerHandle {
    /// Stop the trigger and wait for its task to exit.
    ///
    /// An invocation already running is allowed to finish; once this returns
    /// no further invocation happens. Calling it again is a no-op.
    pub async fn cancel(&self) {
        self.cancel_tx.send_replace(true);

        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "trigger task ended abnormally");
        }
    }

    /// Whether the trigger task has exited.
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_none_or(|t| t.is_finished())
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.cancel_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting_action(
        counter: Arc<AtomicUsize>,
        work: Duration,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static {
        move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if !work.is_zero() {
                    sleep(work).await;
                }
            })
        }
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let result = Trigger::start(Duration::ZERO, || async {});
        assert!(matches!(result, Err(SchedulerError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_immediately_then_per_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Trigger::start(
            Duration::from_secs(1),
            counting_action(Arc::clone(&counter), Duration::ZERO),
        )
        .unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "immediate invocation");

        sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        handle.cancel().await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_invocations_after_cancel() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Trigger::start(
            Duration::from_secs(1),
            counting_action(Arc::clone(&counter), Duration::ZERO),
        )
        .unwrap();

        sleep(Duration::from_millis(2500)).await;
        handle.cancel().await;
        let at_cancel = counter.load(Ordering::SeqCst);
        assert_eq!(at_cancel, 3);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), at_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_invocation_completes_on_cancel() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));

        let handle = Trigger::start(Duration::from_secs(1), move || {
            let (s, f) = (Arc::clone(&s), Arc::clone(&f));
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(500)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        // Mid-way through the first invocation.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        handle.cancel().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Trigger::start(
            Duration::from_secs(1),
            counting_action(Arc::clone(&counter), Duration::ZERO),
        )
        .unwrap();

        sleep(Duration::from_millis(10)).await;
        handle.cancel().await;
        handle.cancel().await;
        handle.cancel().await;
        assert!(handle.is_finished());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_poll_suppresses_action() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Trigger::start(
            Duration::from_secs(1),
            counting_action(Arc::clone(&counter), Duration::ZERO),
        )
        .unwrap();

        // current_thread runtime: the spawned task has not been polled yet.
        handle.cancel().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_action_skips_ticks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let work = Duration::from_millis(2500);
        let handle = Trigger::start(
            Duration::from_secs(1),
            counting_action(Arc::clone(&counter), work),
        )
        .unwrap();

        let elapsed = Duration::from_millis(9900);
        sleep(elapsed).await;
        let count = counter.load(Ordering::SeqCst);
        handle.cancel().await;

        let bound = (elapsed.as_millis() / work.as_millis()) as usize + 1;
        assert!(count >= 2, "trigger kept running: {count}");
        assert!(count <= bound, "{count} invocations exceeds bound {bound}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_trigger() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Trigger::start(
            Duration::from_secs(1),
            counting_action(Arc::clone(&counter), Duration::ZERO),
        )
        .unwrap();

        sleep(Duration::from_millis(10)).await;
        drop(handle);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
