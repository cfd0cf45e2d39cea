//! Posts and publication results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Platform, UpstreamError};

/// Content to publish on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Platform name as supplied by the producer; resolved at publish time.
    pub platform: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: Option<String>,
    /// Space-separated hashtags.
    #[serde(default)]
    pub hashtags: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Upstream channel id; falls back to the configured one for the platform.
    #[serde(default)]
    pub integration: Option<String>,
}

impl Post {
    /// Parse a post from an item payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, UpstreamError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| UpstreamError::Validation(format!("payload is not a post: {}", e)))
    }

    pub fn resolve_platform(&self) -> Result<Platform, UpstreamError> {
        Platform::parse(&self.platform)
    }

    /// The text body sent upstream.
    pub fn content(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for part in [self.title.as_str(), self.description.as_str()] {
            if !part.trim().is_empty() {
                parts.push(part.trim());
            }
        }
        if let Some(link) = self.link.as_deref().filter(|l| !l.trim().is_empty()) {
            parts.push(link.trim());
        }
        if !self.hashtags.trim().is_empty() {
            parts.push(self.hashtags.trim());
        }
        parts.join("\n\n")
    }
}

/// What a publisher reports after a successful post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub platform: Platform,
    /// Upstream id of the created post.
    pub external_id: String,
    pub link: Option<String>,
    pub content_type: Option<String>,
    pub published_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_payload_defaults() {
        let post = Post::from_payload(&serde_json::json!({
            "platform": "li",
            "title": "Launch day",
        }))
        .unwrap();
        assert_eq!(post.title, "Launch day");
        assert_eq!(post.link, None);
        assert_eq!(post.resolve_platform().unwrap(), Platform::Linkedin);
    }

    #[test]
    fn test_from_payload_requires_platform() {
        let err = Post::from_payload(&serde_json::json!({ "title": "x" })).unwrap_err();
        assert!(matches!(err, UpstreamError::Validation(_)));
    }

    #[test]
    fn test_content_skips_empty_parts() {
        let post = Post {
            platform: "x".into(),
            title: "Launch day".into(),
            description: "  ".into(),
            link: Some("https://example.com/launch".into()),
            hashtags: "#rust #release".into(),
            content_type: None,
            integration: None,
        };
        assert_eq!(
            post.content(),
            "Launch day\n\nhttps://example.com/launch\n\n#rust #release"
        );
    }
}
