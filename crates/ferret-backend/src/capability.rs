//! Capability contracts consumed by pipeline steps.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AuthError, BackendError};

/// Key/value cache.
///
/// Eviction is the backend's own concern.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store `value` under `key`, overwriting any previous value.
    async fn save(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
}

/// Topic-based message queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Publish `payload` to `topic` without waiting for consumers.
    async fn send(&self, topic: &str, payload: serde_json::Value) -> Result<(), BackendError>;
}

/// Best-effort event sink.
///
/// Implementations must not block and must swallow their own failures.
pub trait Telemetry: Send + Sync {
    fn track_event(&self, name: &str);

    /// Record a measurement, such as a count or a duration in seconds.
    fn record_metric(&self, name: &str, value: f64) {
        let _ = (name, value);
    }
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
}

/// Token verification.
#[async_trait]
pub trait Auth: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// The backends available to one pipeline run.
#[derive(Clone)]
pub struct Capabilities {
    pub cache: Arc<dyn Cache>,
    pub queue: Arc<dyn Queue>,
    pub telemetry: Arc<dyn Telemetry>,
    pub auth: Arc<dyn Auth>,
}

impl Capabilities {
    pub fn new(
        cache: Arc<dyn Cache>,
        queue: Arc<dyn Queue>,
        telemetry: Arc<dyn Telemetry>,
        auth: Arc<dyn Auth>,
    ) -> Self {
        Self {
            cache,
            queue,
            telemetry,
            auth,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
