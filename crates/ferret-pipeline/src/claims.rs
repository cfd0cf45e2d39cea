//! Claiming with claim events and metrics.

use chrono::Duration;
use ferret_backend::Capabilities;
use ferret_scheduler::{ClaimEngine, DueItemStore, ScheduledItem, SchedulerError};
use tokio::time::Instant;
use tracing::warn;

/// Queue message type sent for each claimed item.
pub const CLAIM_EVENT: &str = "schedule.claimed";
/// Metric recording how long each claim took, in seconds.
pub const CLAIM_SECONDS_METRIC: &str = "scheduler_claim_seconds";
/// Metric recording how many items each claim returned.
pub const CLAIMED_TOTAL_METRIC: &str = "scheduler_claimed_total";

/// The queue message announcing one claimed item.
pub fn claim_event(item: &ScheduledItem) -> serde_json::Value {
    let mut event = serde_json::json!({
        "type": CLAIM_EVENT,
        "id": item.id.as_str(),
        "scheduled_at": item.due_at.to_rfc3339(),
        "attempts": item.attempts,
    });
    if let Some(platform) = item.payload.get("platform").and_then(|v| v.as_str()) {
        event["platform"] = serde_json::Value::from(platform);
    }
    event
}

/// Claim due items and report the claim.
///
/// Records the claim duration and count through telemetry and, when `topic`
/// is set, sends one [`CLAIM_EVENT`] message per item. Reporting is best
/// effort: a queue failure is logged and the claimed items are still
/// returned.
pub async fn claim_and_report<S: DueItemStore + ?Sized>(
    engine: &ClaimEngine<S>,
    capabilities: &Capabilities,
    topic: Option<&str>,
    window: Duration,
    limit: usize,
) -> Result<Vec<ScheduledItem>, SchedulerError> {
    let started = Instant::now();
    let items = engine.claim(window, limit).await?;

    let telemetry = &capabilities.telemetry;
    telemetry.record_metric(CLAIM_SECONDS_METRIC, started.elapsed().as_secs_f64());
    telemetry.record_metric(CLAIMED_TOTAL_METRIC, items.len() as f64);

    if let Some(topic) = topic {
        for item in &items {
            if let Err(e) = capabilities.queue.send(topic, claim_event(item)).await {
                warn!(item_id = %item.id, topic = %topic, error = %e, "claim event not sent");
            }
        }
    }
    Ok(items)
}
