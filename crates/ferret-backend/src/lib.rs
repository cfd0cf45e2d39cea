//! Backend capabilities for Ferret pipelines.
//!
//! Pipelines talk to side-effect services only through the traits here:
//! [`Cache`], [`Queue`], [`Telemetry`] and [`Auth`]. Production adapters
//! ([`BoundedCache`], [`LogQueue`], [`TracingTelemetry`], [`TokenAuth`]) live
//! alongside the contracts; in-memory reference backends for tests are behind
//! the `memory` feature.

pub mod auth;
mod cache;
mod capability;
pub mod config;
mod error;
#[cfg(feature = "memory")]
pub mod memory;
mod queue;
mod telemetry;

pub use auth::{TokenAuth, compare_token_hash, generate_token, hash_token};
pub use cache::{BoundedCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use capability::{Auth, Cache, Capabilities, Identity, Queue, Telemetry};
pub use config::BackendConfig;
pub use error::{AuthError, BackendError};
#[cfg(feature = "memory")]
pub use memory::{MemoryCache, MemoryQueue, MemoryTelemetry};
pub use queue::LogQueue;
pub use telemetry::{NoopTelemetry, TracingTelemetry};
