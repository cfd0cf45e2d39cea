//! Append-only log of published posts, one JSON object per line.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferret_backend::Cache;
use ferret_publish::{Platform, Publication};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::PublishLogError;
use crate::steps::idempotency_key;

/// Default location of the log, relative to the working directory.
pub const DEFAULT_PUBLISH_LOG: &str = "data/published_posts.jsonl";

/// One line of the publish log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRecord {
    pub platform: String,
    /// Upstream id of the post.
    pub id: String,
    /// The scheduled item that produced the post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl PublishedRecord {
    pub fn new(item_id: &str, publication: &Publication) -> Self {
        Self {
            platform: publication.platform.to_string(),
            id: publication.external_id.clone(),
            item_id: Some(item_id.to_string()),
            link: publication.link.clone(),
            content_type: publication.content_type.clone(),
            published_at: publication.published_at,
        }
    }
}

impl PublishedRecord {
    /// The publication this record describes, if its platform is known.
    pub fn publication(&self) -> Option<Publication> {
        let platform = Platform::parse(&self.platform).ok()?;
        Some(Publication {
            platform,
            external_id: self.id.clone(),
            link: self.link.clone(),
            content_type: self.content_type.clone(),
            published_at: self.published_at,
        })
    }
}

#[async_trait]
pub trait PublishLog: Send + Sync {
    async fn append(&self, record: &PublishedRecord) -> Result<(), PublishLogError>;
}

/// [`PublishLog`] backed by a JSON lines file.
///
/// The parent directory is created on first write and the file is reopened
/// in append mode for every record.
#[derive(Debug)]
pub struct JsonlPublishLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlPublishLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, source: std::io::Error) -> PublishLogError {
        PublishLogError::Unavailable {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PublishLog for JsonlPublishLog {
    async fn append(&self, record: &PublishedRecord) -> Result<(), PublishLogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;
        file.write_all(&line).await.map_err(|e| self.unavailable(e))?;
        file.flush().await.map_err(|e| self.unavailable(e))?;

        debug!(path = %self.path.display(), id = %record.id, "appended publish record");
        Ok(())
    }
}

/// Read every record in the log at `path`.
///
/// A missing file reads as empty. Lines that do not parse are skipped.
pub async fn read_published(path: impl AsRef<Path>) -> Result<Vec<PublishedRecord>, PublishLogError> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PublishLogError::Unavailable {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %path.display(), line = index + 1, error = %e, "skipping malformed publish record");
            }
        }
    }
    Ok(records)
}

/// Mark every logged publication as already published in `cache`.
///
/// The publish step consults the cache before posting, so after a restart
/// an item whose outcome was never recorded is not posted a second time.
/// Records without an item id or with an unknown platform are skipped.
/// Returns the number of entries restored.
pub async fn restore_publications(
    path: impl AsRef<Path>,
    cache: &dyn Cache,
) -> Result<usize, PublishLogError> {
    let mut restored = 0;
    for record in read_published(path.as_ref()).await? {
        let (Some(item_id), Some(publication)) = (&record.item_id, record.publication()) else {
            continue;
        };
        let value = serde_json::to_string(&publication)?;
        cache.save(&idempotency_key(item_id), &value).await?;
        restored += 1;
    }
    if restored > 0 {
        info!(path = %path.as_ref().display(), count = restored, "restored publications");
    }
    Ok(restored)
}
