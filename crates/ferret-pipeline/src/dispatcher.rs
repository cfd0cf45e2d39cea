//! Runs claimed items through a workflow and records each outcome.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use ferret_backend::Capabilities;
use ferret_scheduler::{ClaimEngine, DueItemStore, RetryPolicy, ScheduledItem};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::claims::claim_and_report;
use crate::publish_log::{PublishLog, PublishedRecord};
use crate::{DispatchError, Workflow};

/// What happened to one dispatched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    /// Put back in the queue after a retryable failure.
    Requeued { due_at: DateTime<Utc> },
    Failed { error: String },
}

/// Counts from one sweep, claim and dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Stale items made claimable again by the sweep.
    pub reclaimed: usize,
    pub claimed: usize,
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Items whose outcome could not be recorded. They stay `processing`
    /// until the sweep resets them.
    pub errors: usize,
}

pub struct Dispatcher<S: ?Sized> {
    engine: Arc<ClaimEngine<S>>,
    workflow: Arc<Workflow>,
    capabilities: Capabilities,
    publish_log: Arc<dyn PublishLog>,
    retry: RetryPolicy,
    run_timeout: Option<StdDuration>,
    claim_events: Option<String>,
}

impl<S: DueItemStore + ?Sized> Dispatcher<S> {
    pub fn new(
        engine: Arc<ClaimEngine<S>>,
        workflow: Arc<Workflow>,
        capabilities: Capabilities,
        publish_log: Arc<dyn PublishLog>,
    ) -> Self {
        Self {
            engine,
            workflow,
            capabilities,
            publish_log,
            retry: RetryPolicy::default(),
            run_timeout: None,
            claim_events: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound each workflow run. A run that overruns fails with a retryable
    /// deadline error.
    pub fn with_run_timeout(mut self, timeout: StdDuration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Announce each claimed item on `topic`.
    pub fn with_claim_events(mut self, topic: impl Into<String>) -> Self {
        self.claim_events = Some(topic.into());
        self
    }

    pub fn engine(&self) -> &Arc<ClaimEngine<S>> {
        &self.engine
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Run the workflow for one claimed item and record the outcome.
    ///
    /// On success the publication, if any, is appended to the publish log
    /// before the item is marked done. A retryable failure with attempts
    /// left requeues the item with backoff; any other failure is terminal.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.id, attempts = item.attempts))]
    pub async fn dispatch(&self, item: &ScheduledItem) -> Result<DispatchOutcome, DispatchError> {
        let deadline = self.run_timeout.map(|timeout| Instant::now() + timeout);
        let result = self
            .workflow
            .run(
                item.id.as_str(),
                item.payload.clone(),
                &self.capabilities,
                deadline,
            )
            .await;

        match result {
            Ok(report) => {
                if let Some(publication) = &report.publication {
                    self.publish_log
                        .append(&PublishedRecord::new(item.id.as_str(), publication))
                        .await?;
                }
                self.engine.complete(item).await?;
                self.capabilities.telemetry.track_event("item.completed");
                info!(nodes = report.executed.len(), "item completed");
                Ok(DispatchOutcome::Completed)
            }
            Err(e) if e.is_retryable() && self.retry.allows_retry(item.attempts) => {
                let mut delay = self.retry.delay_for(item.attempts);
                if let Some(after) = e.retry_after().and_then(|d| Duration::from_std(d).ok()) {
                    delay = delay.max(after);
                }
                let message = e.to_string();
                let due_at = self.engine.requeue(item, delay, &message).await?;
                self.capabilities.telemetry.track_event("item.requeued");
                warn!(due_at = %due_at, error = %message, "item requeued");
                Ok(DispatchOutcome::Requeued { due_at })
            }
            Err(e) => {
                let message = e.to_string();
                self.engine.fail(item, &message).await?;
                self.capabilities.telemetry.track_event("item.failed");
                error!(error = %message, "item failed");
                Ok(DispatchOutcome::Failed { error: message })
            }
        }
    }

    /// Sweep stale claims, claim due items, and dispatch them one by one.
    ///
    /// Store failures during the sweep or claim abort the cycle. A failure
    /// to record one item's outcome is counted and the cycle moves on.
    #[tracing::instrument(skip(self), fields(window_secs = window.num_seconds()))]
    pub async fn poll_once(
        &self,
        window: Duration,
        limit: usize,
    ) -> Result<PollSummary, DispatchError> {
        let mut summary = PollSummary {
            reclaimed: self.engine.sweep_stale().await?.len(),
            ..PollSummary::default()
        };

        let items = claim_and_report(
            &self.engine,
            &self.capabilities,
            self.claim_events.as_deref(),
            window,
            limit,
        )
        .await?;
        summary.claimed = items.len();

        for item in &items {
            match self.dispatch(item).await {
                Ok(DispatchOutcome::Completed) => summary.completed += 1,
                Ok(DispatchOutcome::Requeued { .. }) => summary.requeued += 1,
                Ok(DispatchOutcome::Failed { .. }) => summary.failed += 1,
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "could not record outcome");
                    summary.errors += 1;
                }
            }
        }

        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                completed = summary.completed,
                requeued = summary.requeued,
                failed = summary.failed,
                errors = summary.errors,
                "poll cycle finished"
            );
        }
        Ok(summary)
    }
}
