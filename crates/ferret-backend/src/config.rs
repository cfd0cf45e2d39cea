//! Backend configuration from the process environment.

use std::time::Duration;

use crate::auth::DEFAULT_TOKEN_BYTES;
use crate::cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};

pub const DEFAULT_POST_EVENTS_TOPIC: &str = "persistent://public/default/post-events";
pub const DEFAULT_SCHEDULE_EVENTS_TOPIC: &str = "persistent://public/default/schedule-events";
pub const DEFAULT_SERVICE_NAME: &str = "ferret";

/// Settings for the cache, queue, telemetry and auth backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Queue service URL (`PULSAR_SERVICE_URL`). Unset disables the queue.
    pub queue_url: Option<String>,
    /// Topic for post lifecycle events (`PULSAR_TOPIC_POST_EVENTS`).
    pub post_events_topic: String,
    /// Topic for claim events (`PULSAR_TOPIC_SCHEDULE_EVENTS`).
    pub schedule_events_topic: String,
    /// Most entries the cache keeps (`FERRET_CACHE_CAPACITY`).
    pub cache_capacity: usize,
    /// How long a cache entry lives (`FERRET_CACHE_TTL_SECS`).
    pub cache_ttl: Duration,
    /// Whether telemetry is exported (`OTEL_ENABLED`).
    pub telemetry_enabled: bool,
    /// Service name attached to telemetry (`OTEL_SERVICE_NAME`).
    pub service_name: String,
    /// Entropy of issued tokens (`FERRET_TOKEN_BYTES`).
    pub token_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl BackendConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset and
    /// unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            queue_url: get("PULSAR_SERVICE_URL"),
            post_events_topic: get("PULSAR_TOPIC_POST_EVENTS")
                .unwrap_or_else(|| DEFAULT_POST_EVENTS_TOPIC.to_string()),
            schedule_events_topic: get("PULSAR_TOPIC_SCHEDULE_EVENTS")
                .unwrap_or_else(|| DEFAULT_SCHEDULE_EVENTS_TOPIC.to_string()),
            cache_capacity: get("FERRET_CACHE_CAPACITY")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_CACHE_CAPACITY),
            cache_ttl: get("FERRET_CACHE_TTL_SECS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CACHE_TTL),
            telemetry_enabled: get("OTEL_ENABLED").is_some_and(|v| parse_bool(&v)),
            service_name: get("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            token_bytes: get("FERRET_TOKEN_BYTES")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_TOKEN_BYTES),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
