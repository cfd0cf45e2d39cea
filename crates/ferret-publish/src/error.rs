//! Error types for outbound publishing.

use std::fmt;

use thiserror::Error;

/// Semantic category of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamKind {
    Unauthorized,
    Forbidden,
    RateLimited,
    NotFound,
    Server,
    Api,
    Transport,
    InvalidResponse,
    UnknownPlatform,
    Validation,
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Server => "server",
            Self::Api => "api",
            Self::Transport => "transport",
            Self::InvalidResponse => "invalid_response",
            Self::UnknownPlatform => "unknown_platform",
            Self::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// Errors from a publishing API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// 401 from the API.
    #[error("unauthorized: {body}")]
    Unauthorized { body: String },

    /// 403 from the API.
    #[error("forbidden: {body}")]
    Forbidden { body: String },

    /// 429 from the API.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header).
        retry_after_secs: Option<u64>,
        body: String,
    },

    /// 404 from the API.
    #[error("not found: {body}")]
    NotFound { body: String },

    /// 5xx from the API.
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// Any other non-success status.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// No bearer token is configured.
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    /// The request never produced a response.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No publisher is registered for the requested platform.
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    /// The post cannot be sent as given.
    #[error("invalid post: {0}")]
    Validation(String),
}

impl UpstreamError {
    /// Map a non-success status and body to an error.
    pub fn from_status(status: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 => Self::Unauthorized { body },
            403 => Self::Forbidden { body },
            404 => Self::NotFound { body },
            429 => Self::RateLimited {
                retry_after_secs,
                body,
            },
            500..=599 => Self::Server { status, body },
            _ => Self::Api { status, body },
        }
    }

    pub fn kind(&self) -> UpstreamKind {
        match self {
            Self::Unauthorized { .. } | Self::MissingCredentials(_) => UpstreamKind::Unauthorized,
            Self::Forbidden { .. } => UpstreamKind::Forbidden,
            Self::RateLimited { .. } => UpstreamKind::RateLimited,
            Self::NotFound { .. } => UpstreamKind::NotFound,
            Self::Server { .. } => UpstreamKind::Server,
            Self::Api { .. } => UpstreamKind::Api,
            Self::Transport(_) => UpstreamKind::Transport,
            Self::InvalidResponse(_) => UpstreamKind::InvalidResponse,
            Self::UnknownPlatform(_) => UpstreamKind::UnknownPlatform,
            Self::Validation(_) => UpstreamKind::Validation,
        }
    }

    /// HTTP status of the upstream response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            UpstreamKind::RateLimited | UpstreamKind::Server | UpstreamKind::Transport
        )
    }

    /// Suggested wait before retrying, if the API gave one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}
