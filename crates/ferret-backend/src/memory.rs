//! In-memory reference backends.
//!
//! These keep everything in process and record what they were asked to do,
//! so pipelines can be run and inspected without external services. Each
//! has a failure switch for exercising error paths.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{BackendError, Cache, Queue, Telemetry};

/// Cache backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
    failing: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("cache", "memory cache set to fail"));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn save(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.check()?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }
}

/// Queue that records every message per topic.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    topics: DashMap<String, Vec<serde_json::Value>>,
    failing: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages sent to `topic`, in send order.
    pub fn messages(&self, topic: &str) -> Vec<serde_json::Value> {
        self.topics
            .get(topic)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Total messages across all topics.
    pub fn total(&self) -> usize {
        self.topics.iter().map(|m| m.value().len()).sum()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send(&self, topic: &str, payload: serde_json::Value) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("queue", "memory queue set to fail"));
        }
        self.topics.entry(topic.to_string()).or_default().push(payload);
        Ok(())
    }
}

/// Telemetry sink that records event names and metric values.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<String>>,
    metrics: Mutex<Vec<(String, f64)>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Values recorded under `name`, in order.
    pub fn metric(&self, name: &str) -> Vec<f64> {
        self.metrics
            .lock()
            .map(|metrics| {
                metrics
                    .iter()
                    .filter(|(n, _)| n == name)
                    .map(|(_, v)| *v)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Telemetry for MemoryTelemetry {
    fn track_event(&self, name: &str) {
        // A poisoned lock drops the event.
        if let Ok(mut events) = self.events.lock() {
            events.push(name.to_string());
        }
    }

    fn record_metric(&self, name: &str, value: f64) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.push((name.to_string(), value));
        }
    }
}
