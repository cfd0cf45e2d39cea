//! Built-in steps.

mod auth;
mod emit;
mod publish;
mod track;

pub use auth::{AuthGate, DEFAULT_TOKEN_FIELD};
pub use emit::{DEFAULT_EVENT, Emit};
pub use publish::{Publish, idempotency_key};
pub use track::Track;
