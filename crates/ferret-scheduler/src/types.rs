//! Scheduler types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a scheduled item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a scheduled item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Waiting to become due; the only claimable state.
    #[default]
    Scheduled,
    /// Claimed by a runner.
    Processing,
    /// Pipeline completed.
    Done,
    /// Pipeline failed permanently or exhausted retries.
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: ItemId,
    /// The item becomes claimable once `due_at <= now + window`.
    pub due_at: DateTime<Utc>,
    pub state: ItemState,
    /// Data needed to execute the item.
    pub payload: serde_json::Value,
    /// Number of times this item has been claimed.
    pub attempts: u32,
    /// Token of the current claim, present only while processing.
    pub claim_token: Option<Uuid>,
    /// When the current claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Error from the most recent failed run.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledItem {
    /// Whether this item may be claimed with the given eligibility horizon
    /// (`now + window`).
    pub fn is_claimable(&self, horizon: DateTime<Utc>) -> bool {
        self.state == ItemState::Scheduled && self.due_at <= horizon
    }

    /// Whether this item has been processing since before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.state == ItemState::Processing && self.claimed_at.is_some_and(|at| at < cutoff)
    }

    /// Whether `token` is the current claim on this item.
    pub fn holds_claim(&self, token: Option<Uuid>) -> bool {
        self.state == ItemState::Processing && token.is_some() && self.claim_token == token
    }
}

/// Input for creating a new scheduled item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    /// Explicit id; generated when absent.
    pub id: Option<ItemId>,
    pub due_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl NewItem {
    pub fn new(due_at: DateTime<Utc>, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            due_at,
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Materialize the item in `scheduled` state.
    pub fn into_item(self, now: DateTime<Utc>) -> ScheduledItem {
        ScheduledItem {
            id: self.id.unwrap_or_else(ItemId::generate),
            due_at: self.due_at,
            state: ItemState::Scheduled,
            payload: self.payload,
            attempts: 0,
            claim_token: None,
            claimed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// How failed runs are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total claims allowed before a retryable failure becomes terminal.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::seconds(30),
            max_delay: Duration::minutes(30),
        }
    }
}

impl RetryPolicy {
    /// Whether an item claimed `attempts` times may run again.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt after `attempts` claims.
    ///
    /// Doubles from `base_delay` per attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let delay = self.base_delay * (1i32 << exponent);
        delay.min(self.max_delay)
    }
}
