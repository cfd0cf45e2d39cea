//! Publisher contract and platform routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{PacedPublisher, Pacer, Platform, Post, Publication, UpstreamError};

/// Sends a post to one platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, platform: Platform, post: &Post) -> Result<Publication, UpstreamError>;
}

/// Routes each platform to its publisher.
///
/// A platform with no registered publisher is an error; there is no fallback.
#[derive(Clone, Default)]
pub struct Publishers {
    routes: BTreeMap<Platform, Arc<dyn Publisher>>,
}

impl Publishers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every known platform to `publisher`.
    pub fn all(publisher: Arc<dyn Publisher>) -> Self {
        let mut publishers = Self::new();
        for platform in Platform::ALL {
            publishers.register(platform, Arc::clone(&publisher));
        }
        publishers
    }

    pub fn register(&mut self, platform: Platform, publisher: Arc<dyn Publisher>) -> &mut Self {
        self.routes.insert(platform, publisher);
        self
    }

    /// Route every platform through `pacer` before its publisher.
    pub fn paced(self, pacer: Arc<Pacer>) -> Self {
        let routes = self
            .routes
            .into_iter()
            .map(|(platform, publisher)| {
                let paced: Arc<dyn Publisher> =
                    Arc::new(PacedPublisher::new(publisher, Arc::clone(&pacer)));
                (platform, paced)
            })
            .collect();
        Self { routes }
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.routes.keys().copied()
    }

    /// Resolve a platform name to its publisher.
    pub fn resolve(&self, name: &str) -> Result<(Platform, Arc<dyn Publisher>), UpstreamError> {
        let platform = Platform::parse(name)?;
        self.routes
            .get(&platform)
            .map(|p| (platform, Arc::clone(p)))
            .ok_or_else(|| UpstreamError::UnknownPlatform(name.to_string()))
    }
}

impl std::fmt::Debug for Publishers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publishers")
            .field("platforms", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct Fixed(&'static str);

    #[async_trait]
    impl Publisher for Fixed {
        async fn publish(
            &self,
            platform: Platform,
            post: &Post,
        ) -> Result<Publication, UpstreamError> {
            Ok(Publication {
                platform,
                external_id: self.0.to_string(),
                link: post.link.clone(),
                content_type: post.content_type.clone(),
                published_at: Utc::now(),
            })
        }
    }

    fn post(platform: &str) -> Post {
        Post::from_payload(&serde_json::json!({ "platform": platform })).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_routes_by_platform() {
        let mut publishers = Publishers::new();
        publishers
            .register(Platform::Mastodon, Arc::new(Fixed("toot")))
            .register(Platform::Twitter, Arc::new(Fixed("tweet")));

        let (platform, publisher) = publishers.resolve("x").unwrap();
        assert_eq!(platform, Platform::Twitter);
        let publication = publisher.publish(platform, &post("x")).await.unwrap();
        assert_eq!(publication.external_id, "tweet");
    }

    #[test]
    fn test_unregistered_platform_is_unknown() {
        let mut publishers = Publishers::new();
        publishers.register(Platform::Mastodon, Arc::new(Fixed("toot")));

        assert!(matches!(
            publishers.resolve("linkedin"),
            Err(UpstreamError::UnknownPlatform(_))
        ));
        assert!(matches!(
            publishers.resolve("myspace"),
            Err(UpstreamError::UnknownPlatform(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_routes_wait_for_budget() {
        let rates = BTreeMap::from([(Platform::Linkedin, 1)]);
        let pacer = Arc::new(Pacer::new(&rates, std::time::Duration::from_secs(1)));
        let publishers = Publishers::all(Arc::new(Fixed("id"))).paced(pacer);

        let start = tokio::time::Instant::now();
        for _ in 0..2 {
            let (platform, publisher) = publishers.resolve("linkedin").unwrap();
            publisher.publish(platform, &post("linkedin")).await.unwrap();
        }
        assert_eq!(start.elapsed(), std::time::Duration::from_secs(1));
        assert_eq!(publishers.platforms().count(), Platform::ALL.len());
    }

    #[test]
    fn test_all_registers_every_platform() {
        let publishers = Publishers::all(Arc::new(Fixed("id")));
        assert_eq!(publishers.platforms().count(), Platform::ALL.len());
    }
}
