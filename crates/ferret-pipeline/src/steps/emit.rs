use tracing::debug;

use crate::{RunContext, StepError};

pub const DEFAULT_EVENT: &str = "schedule.published";

/// Sends a lifecycle event for the run to a queue topic.
#[derive(Debug, Clone)]
pub struct Emit {
    topic: String,
    event: String,
}

impl Emit {
    pub fn new(topic: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
        }
    }

    pub async fn execute(&self, ctx: &mut RunContext) -> Result<(), StepError> {
        let mut message = serde_json::json!({
            "type": self.event,
            "id": ctx.run_id,
        });

        let platform = match &ctx.publication {
            Some(publication) => Some(publication.platform.to_string()),
            None => ctx.payload_str("platform").map(str::to_string),
        };
        if let Some(platform) = platform {
            message["platform"] = serde_json::Value::String(platform);
        }
        if let Some(publication) = &ctx.publication {
            message["external_id"] = serde_json::Value::String(publication.external_id.clone());
        }

        ctx.capabilities.queue.send(&self.topic, message).await?;
        debug!(run_id = %ctx.run_id, topic = %self.topic, event = %self.event, "emitted event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestBackends;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_emits_event_with_platform() {
        let backends = TestBackends::new();
        let mut ctx = backends.context("post-9", serde_json::json!({ "platform": "linkedin" }));

        Emit::new("post-events", DEFAULT_EVENT)
            .execute(&mut ctx)
            .await
            .unwrap();

        assert_eq!(
            backends.queue.messages("post-events"),
            vec![serde_json::json!({
                "type": "schedule.published",
                "id": "post-9",
                "platform": "linkedin",
            })]
        );
    }

    #[tokio::test]
    async fn test_queue_failure_is_retryable() {
        let backends = TestBackends::new();
        backends.queue.set_failing(true);
        let mut ctx = backends.context("post-9", serde_json::json!({}));

        let err = Emit::new("post-events", "schedule.claimed")
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.retryable);
    }
}
