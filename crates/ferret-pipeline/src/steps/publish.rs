use chrono::Utc;
use ferret_publish::{Post, Publication, Publishers};
use tracing::{info, warn};

use crate::{RunContext, StepError};

/// Cache key marking a run as already published.
pub fn idempotency_key(run_id: &str) -> String {
    format!("published:{}", run_id)
}

/// Publishes the payload's post on its platform.
///
/// A successful publication is recorded in the cache under the run id, and a
/// rerun of the same item reuses it instead of posting again.
#[derive(Debug, Clone)]
pub struct Publish {
    publishers: Publishers,
    platform: Option<String>,
}

impl Publish {
    pub fn new(publishers: Publishers) -> Self {
        Self {
            publishers,
            platform: None,
        }
    }

    /// Publish to `platform` regardless of the payload's platform field.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub async fn execute(&self, ctx: &mut RunContext) -> Result<(), StepError> {
        let mut post = Post::from_payload(&ctx.payload)?;
        if let Some(platform) = &self.platform {
            post.platform = platform.clone();
        }
        let (platform, publisher) = self.publishers.resolve(&post.platform)?;

        let key = idempotency_key(&ctx.run_id);
        if let Some(cached) = ctx.capabilities.cache.get(&key).await? {
            info!(run_id = %ctx.run_id, "already published, skipping");
            let publication = serde_json::from_str(&cached).unwrap_or_else(|_| Publication {
                platform,
                external_id: cached,
                link: post.link.clone(),
                content_type: post.content_type.clone(),
                published_at: Utc::now(),
            });
            ctx.publication = Some(publication);
            return Ok(());
        }

        let publication = publisher.publish(platform, &post).await?;
        info!(
            run_id = %ctx.run_id,
            platform = %platform,
            external_id = %publication.external_id,
            "published post"
        );

        let record = serde_json::to_string(&publication)
            .map_err(|e| StepError::permanent(format!("encode publication: {}", e)))?;
        if let Err(e) = ctx.capabilities.cache.save(&key, &record).await {
            // Retrying would post a duplicate.
            warn!(run_id = %ctx.run_id, error = %e, "failed to record publication");
            return Err(StepError::permanent(format!(
                "published as {} but could not record it: {}",
                publication.external_id, e
            )));
        }

        ctx.publication = Some(publication);
        Ok(())
    }
}
