//! Social platforms and their accepted names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mastodon,
    Twitter,
    Linkedin,
    Facebook,
    Instagram,
    Threads,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Self::Mastodon,
        Self::Twitter,
        Self::Linkedin,
        Self::Facebook,
        Self::Instagram,
        Self::Threads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mastodon => "mastodon",
            Self::Twitter => "twitter",
            Self::Linkedin => "linkedin",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Threads => "threads",
        }
    }

    /// Resolve a platform name. Case-insensitive; common aliases accepted.
    pub fn parse(name: &str) -> Result<Self, UpstreamError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mastodon" | "masto" => Ok(Self::Mastodon),
            "twitter" | "x" => Ok(Self::Twitter),
            "linkedin" | "li" | "ln" => Ok(Self::Linkedin),
            "facebook" | "fb" => Ok(Self::Facebook),
            "instagram" | "ig" => Ok(Self::Instagram),
            "threads" | "thread" => Ok(Self::Threads),
            _ => Err(UpstreamError::UnknownPlatform(name.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
