//! Core append-blob store trait.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{BlobResult, TagQuery};

/// Append-only blob primitives consumed by the upload store.
///
/// Every blob lives inside a single container and is addressed by an id
/// relative to it. Blobs carry a string metadata map and a separate tag map;
/// only tags are queryable.
#[async_trait]
pub trait AppendBlobStore: Send + Sync {
    /// Create the backing container if it does not exist yet.
    ///
    /// Returns `true` when this call created it.
    async fn create_container_if_absent(&self, public: bool) -> BlobResult<bool>;

    /// Create an empty append blob with the given metadata.
    ///
    /// Returns `false` without touching the existing blob when one already
    /// exists under `id`.
    async fn create_if_absent(&self, id: &str, metadata: HashMap<String, String>)
        -> BlobResult<bool>;

    /// Returns `BlobError::NotFound` if the blob doesn't exist.
    async fn get_metadata(&self, id: &str) -> BlobResult<HashMap<String, String>>;

    /// Replace the blob's metadata map.
    async fn set_metadata(&self, id: &str, metadata: HashMap<String, String>) -> BlobResult<()>;

    /// Replace the blob's tag map.
    async fn set_tags(&self, id: &str, tags: HashMap<String, String>) -> BlobResult<()>;

    async fn get_tags(&self, id: &str) -> BlobResult<HashMap<String, String>>;

    /// Ids of every blob in the container whose tags match `query`.
    ///
    /// Backends may serve this from an eventually consistent index, so a tag
    /// written by `set_tags` is not guaranteed to be visible immediately.
    async fn find_by_tag_query(&self, query: &TagQuery) -> BlobResult<Vec<String>>;

    /// Atomically append one block.
    ///
    /// `md5` is the precomputed digest of `block`; the backend rejects the
    /// block with `BlobError::ChecksumMismatch` if the bytes it received
    /// don't hash to it.
    async fn append_block(&self, id: &str, block: Bytes, md5: [u8; 16]) -> BlobResult<()>;

    async fn exists(&self, id: &str) -> BlobResult<bool>;

    /// Delete the blob together with its blocks, metadata and tags.
    ///
    /// Returns `false` if there was nothing to delete.
    async fn delete_if_exists(&self, id: &str) -> BlobResult<bool>;

    /// Stream the blob's content, blocks in append order.
    async fn open_read(&self, id: &str) -> BlobResult<BoxStream<'static, BlobResult<Bytes>>>;
}
