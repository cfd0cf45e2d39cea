//! Error types for backend capabilities.

use thiserror::Error;

/// Errors reported by cache and queue backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached or rejected the operation.
    #[error("{backend} unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },

    /// A value could not be encoded for the backend.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    pub fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: message.into(),
        }
    }
}

/// Errors from token issuance and verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token was presented.
    #[error("missing token")]
    MissingToken,

    /// The token is unknown, revoked, or malformed.
    #[error("invalid token")]
    InvalidToken,

    /// A token could not be generated.
    #[error("token generation failed: {0}")]
    Generation(String),
}
