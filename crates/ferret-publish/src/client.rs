//! HTTP client for the publishing API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};

use crate::config::TOKEN_VAR;
use crate::{Platform, Post, Publication, PublishConfig, Publisher, Publishers, UpstreamError};

/// Publishes posts through the scheduling API's `/posts` endpoint.
pub struct HttpPublisher {
    http: Client,
    config: PublishConfig,
}

impl HttpPublisher {
    pub fn new(config: PublishConfig) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Route every platform through one shared client.
    pub fn into_publishers(self) -> Publishers {
        Publishers::all(Arc::new(self))
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    fn token(&self) -> Result<&str, UpstreamError> {
        self.config
            .token
            .as_deref()
            .ok_or(UpstreamError::MissingCredentials(TOKEN_VAR))
    }

    fn integration(&self, platform: Platform, post: &Post) -> Result<String, UpstreamError> {
        post.integration
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.config.integrations.get(&platform).cloned())
            .ok_or_else(|| {
                UpstreamError::Validation(format!("no integration configured for {}", platform))
            })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, UpstreamError> {
        let token = self.token()?;
        let url = self.config.endpoint(path);
        debug!(url = %url, "sending publish request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    #[instrument(skip(self, post))]
    async fn publish(&self, platform: Platform, post: &Post) -> Result<Publication, UpstreamError> {
        let content = post.content();
        if content.is_empty() {
            return Err(UpstreamError::Validation("post has no content".to_string()));
        }
        let integration = self.integration(platform, post)?;
        let now = Utc::now();

        let request = CreatePostsRequest {
            kind: "now",
            short_link: false,
            date: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            posts: vec![PostDraft {
                integration: IntegrationRef { id: integration },
                value: vec![PostValue { content }],
                settings: PostSettings {
                    kind: platform.as_str(),
                },
            }],
        };

        let created: Vec<CreatedPost> = self.post_json("/posts", &request).await?;
        let created = created.into_iter().next().ok_or_else(|| {
            UpstreamError::InvalidResponse("no post in create response".to_string())
        })?;

        Ok(Publication {
            platform,
            external_id: created.post_id,
            link: created.release_url.or_else(|| post.link.clone()),
            content_type: post.content_type.clone(),
            published_at: now,
        })
    }
}

/// Turn a response into `T`, mapping failure statuses to `UpstreamError`.
async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, UpstreamError> {
    let status = response.status();

    if !status.is_success() {
        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        let body = response.text().await.map_err(|e| {
            UpstreamError::InvalidResponse(format!(
                "request failed ({}): failed to read response: {}",
                status, e
            ))
        })?;
        return Err(UpstreamError::from_status(
            status.as_u16(),
            body,
            retry_after_secs,
        ));
    }

    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| UpstreamError::InvalidResponse(format!("{}: {}", e, text)))
}

#[derive(Debug, Serialize)]
struct CreatePostsRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "shortLink")]
    short_link: bool,
    date: String,
    posts: Vec<PostDraft>,
}

#[derive(Debug, Serialize)]
struct PostDraft {
    integration: IntegrationRef,
    value: Vec<PostValue>,
    settings: PostSettings,
}

#[derive(Debug, Serialize)]
struct IntegrationRef {
    id: String,
}

#[derive(Debug, Serialize)]
struct PostValue {
    content: String,
}

#[derive(Debug, Serialize)]
struct PostSettings {
    #[serde(rename = "__type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    #[serde(rename = "postId")]
    post_id: String,
    #[serde(rename = "releaseURL", default)]
    release_url: Option<String>,
}
