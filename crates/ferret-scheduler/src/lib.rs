//! Due-item scheduling for Ferret.
//!
//! This crate provides:
//! - A periodic [`Trigger`] that fires immediately and then on an interval
//! - The [`DueItemStore`] contract with in-memory and SQLite implementations
//! - A [`ClaimEngine`] that hands each due item to exactly one claimant
//! - A stale-claim sweep that recovers items abandoned mid-processing

mod claim;
pub mod clock;
mod error;
pub mod store;
mod trigger;
mod types;

pub use claim::{ClaimEngine, DEFAULT_CLAIM_LIMIT, DEFAULT_STALE_AFTER};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SchedulerError;
pub use store::{ClaimBatch, ClaimRef, DueItemStore, MemoryStore, SqliteStore};
pub use trigger::{Trigger, TriggerHandle};
pub use types::{ItemId, ItemState, NewItem, RetryPolicy, ScheduledItem};
