//! Production queue adapter.

use async_trait::async_trait;
use tracing::info;

use crate::{BackendError, Queue};

/// Writes every message to the log under `ferret::queue` and keeps nothing.
///
/// Used when no message broker is configured, so events stay observable
/// without accumulating in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogQueue;

#[async_trait]
impl Queue for LogQueue {
    async fn send(&self, topic: &str, payload: serde_json::Value) -> Result<(), BackendError> {
        let payload = serde_json::to_string(&payload)?;
        info!(target: "ferret::queue", topic = %topic, payload = %payload, "queue message");
        Ok(())
    }
}
