//! Outbound publishing for Ferret.
//!
//! [`Publishers`] maps each [`Platform`] to a [`Publisher`]; [`HttpPublisher`]
//! is the production implementation backed by the scheduling API. Failures
//! are reported as [`UpstreamError`] with a semantic [`UpstreamKind`] and the
//! upstream status and body preserved. A [`Pacer`] spaces posts out per
//! platform.

mod client;
pub mod config;
mod error;
mod pacing;
mod platform;
mod post;
mod publisher;

pub use client::HttpPublisher;
pub use config::PublishConfig;
pub use error::{UpstreamError, UpstreamKind};
pub use pacing::{DEFAULT_PACING_WINDOW, DEFAULT_RATE, PacedPublisher, Pacer};
pub use platform::Platform;
pub use post::{Post, Publication};
pub use publisher::{Publisher, Publishers};
