//! Production telemetry adapters.

use tracing::info;

use crate::Telemetry;

/// Emits one `tracing` event per tracked event.
#[derive(Debug, Clone)]
pub struct TracingTelemetry {
    service: String,
}

impl TracingTelemetry {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Telemetry for TracingTelemetry {
    fn track_event(&self, name: &str) {
        info!(target: "ferret::telemetry", service = %self.service, event = %name, "event");
    }

    fn record_metric(&self, name: &str, value: f64) {
        info!(target: "ferret::telemetry", service = %self.service, metric = %name, value, "metric");
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track_event(&self, _name: &str) {}
}
