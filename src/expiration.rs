//! Expiration index for abandoned uploads.

use std::sync::Arc;

use async_trait::async_trait;
use blob_store::{AppendBlobStore, TagQuery};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::{Result, UploadStoreError};

pub const EXPIRATION_TAG: &str = "ExpiresAt";

// Lexical order of this format matches chronological order.
const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_expiration(ts: DateTime<Utc>) -> String {
    ts.format(EXPIRATION_FORMAT).to_string()
}

pub fn parse_expiration(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, EXPIRATION_FORMAT)
        .ok()
        .map(|ts| ts.and_utc())
}

#[async_trait]
pub trait ExpirationIndex: Send + Sync {
    async fn set_expiration(&self, id: &str, expires: DateTime<Utc>) -> Result<()>;

    /// Stored expiry of `id`, truncated to whole seconds.
    async fn get_expiration(&self, id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Ids whose expiry is strictly earlier than `now` at one-second
    /// resolution.
    async fn get_expired_files(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Keeps expirations as `ExpiresAt` blob tags and finds expired uploads with
/// a tag query.
pub struct TagExpirationIndex {
    blobs: Arc<dyn AppendBlobStore>,
}

impl TagExpirationIndex {
    pub fn new(blobs: Arc<dyn AppendBlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl ExpirationIndex for TagExpirationIndex {
    async fn set_expiration(&self, id: &str, expires: DateTime<Utc>) -> Result<()> {
        let mut tags = self.blobs.get_tags(id).await?;
        let value = format_expiration(expires);
        debug!(id, expires_at = %value, "setting expiration");
        tags.insert(EXPIRATION_TAG.to_string(), value);
        self.blobs.set_tags(id, tags).await?;
        Ok(())
    }

    async fn get_expiration(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let tags = self.blobs.get_tags(id).await?;
        match tags.get(EXPIRATION_TAG) {
            None => Ok(None),
            Some(value) => parse_expiration(value).map(Some).ok_or_else(|| {
                UploadStoreError::InvalidRecord {
                    id: id.to_string(),
                    key: EXPIRATION_TAG,
                    reason: format!("{:?} is not a timestamp", value),
                }
            }),
        }
    }

    async fn get_expired_files(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let query = TagQuery::less_than(EXPIRATION_TAG, format_expiration(now));
        debug!(%query, "querying expired uploads");
        Ok(self.blobs.find_by_tag_query(&query).await?)
    }
}

/// Index for deployments that never expire uploads.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExpirationIndex;

#[async_trait]
impl ExpirationIndex for NullExpirationIndex {
    async fn set_expiration(&self, _id: &str, _expires: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    async fn get_expiration(&self, _id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn get_expired_files(&self, _now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
