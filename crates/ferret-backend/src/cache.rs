//! Production cache adapter.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tracing::trace;

use crate::{BackendError, Cache};

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct Entry {
    value: String,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

/// In-process cache holding at most `capacity` entries for at most `ttl`.
///
/// The least recently used entry is evicted when the cache is full, and an
/// expired entry is dropped the next time it is read.
pub struct BoundedCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl BoundedCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Entry>>, BackendError> {
        self.entries
            .lock()
            .map_err(|_| BackendError::unavailable("cache", "cache lock poisoned"))
    }
}

impl Default for BoundedCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}

impl std::fmt::Debug for BoundedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl Cache for BoundedCache {
    async fn save(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now().checked_add(self.ttl),
        };
        let evicted = self.lock()?.push(key.to_string(), entry);
        match evicted {
            Some((evicted, _)) if evicted != key => {
                trace!(key = %evicted, "evicted cache entry");
            }
            _ => {}
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at.is_none_or(|t| t > Instant::now()) => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }
}
