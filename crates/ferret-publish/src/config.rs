//! Publishing client configuration from the process environment.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::Platform;

pub const DEFAULT_BASE_URL: &str = "https://api.postiz.com/public";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the variable holding the bearer token.
pub const TOKEN_VAR: &str = "FERRET_PUBLISH_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    pub base_url: String,
    pub api_version: String,
    /// Bearer token. Absence is reported on first publish, not here.
    pub token: Option<String>,
    pub timeout: Duration,
    /// Default upstream channel per platform
    /// (`FERRET_PUBLISH_INTEGRATION_<PLATFORM>`).
    pub integrations: BTreeMap<Platform, String>,
    /// Posts per second per platform (`FERRET_PUBLISH_RATE_<PLATFORM>`).
    /// LinkedIn and Instagram default to one; unlisted platforms use the
    /// pacer's default.
    pub rates: BTreeMap<Platform, u32>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PublishConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let integrations = Platform::ALL
            .iter()
            .filter_map(|platform| {
                let key = format!(
                    "FERRET_PUBLISH_INTEGRATION_{}",
                    platform.as_str().to_ascii_uppercase()
                );
                get(&key).map(|id| (*platform, id))
            })
            .collect();

        let mut rates: BTreeMap<Platform, u32> = Platform::ALL
            .iter()
            .filter_map(|platform| {
                let key = format!(
                    "FERRET_PUBLISH_RATE_{}",
                    platform.as_str().to_ascii_uppercase()
                );
                get(&key)
                    .and_then(|v| v.parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .map(|n| (*platform, n))
            })
            .collect();
        for platform in [Platform::Linkedin, Platform::Instagram] {
            rates.entry(platform).or_insert(1);
        }

        Self {
            base_url: get("FERRET_PUBLISH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: get("FERRET_PUBLISH_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            token: get(TOKEN_VAR),
            timeout: get("FERRET_PUBLISH_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            integrations,
            rates,
        }
    }

    /// Full URL for an API path such as `/posts`.
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let version = self.api_version.trim_matches('/');
        let path = path.trim_start_matches('/');
        if version.is_empty() {
            format!("{}/{}", base, path)
        } else {
            format!("{}/{}/{}", base, version, path)
        }
    }
}
