//! Append blobs emulated on top of any `object_store` backend.
//!
//! Layout under `<base>/<container>/`:
//!
//! ```text
//! .container                                  container marker (visibility)
//! <blob_path>/records/<id>/properties.json    metadata map
//! <blob_path>/records/<id>/blocks/<seq>       one object per appended block
//! <blob_path>/tags/<id>                       id and tag map, listed by tag queries
//! ```
//!
//! An id always maps to a single percent-encoded path segment, so no id can
//! reach into another record's directory. Record creation and block writes
//! use `PutMode::Create`, so a block sequence number can only ever be written
//! once.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use md5::{Digest, Md5};
use object_store::{path::Path, ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{build_object_store, AppendBlobStore, BlobError, BlobResult, TagQuery};

const CONTAINER_MARKER: &str = ".container";
const PROPERTIES_FILE: &str = "properties.json";
const BLOCKS_DIR: &str = "blocks";
const RECORDS_DIR: &str = "records";
const TAGS_DIR: &str = "tags";

#[derive(Debug, Serialize, Deserialize)]
struct ContainerMarker {
    public: bool,
}

/// Tag object contents. The id is kept verbatim since the object name is
/// its encoded form.
#[derive(Debug, Serialize, Deserialize)]
struct TagEntry {
    id: String,
    tags: HashMap<String, String>,
}

/// [`AppendBlobStore`] backed by an `object_store` client.
#[derive(Clone)]
pub struct ObjectStoreAppendBlobs {
    object_store: Arc<dyn ObjectStore>,
    container_root: Path,
    records_root: Path,
    tags_root: Path,
}

impl ObjectStoreAppendBlobs {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        base: Path,
        container: &str,
        blob_path: Option<&str>,
    ) -> Self {
        let container_root = base.child(container);
        let root = join(&container_root, blob_path.unwrap_or_default());
        let records_root = root.child(RECORDS_DIR);
        let tags_root = root.child(TAGS_DIR);
        Self {
            object_store,
            container_root,
            records_root,
            tags_root,
        }
    }

    /// Build from a connection URL such as `file:///var/uploads` or
    /// `s3://bucket/prefix`.
    pub fn from_url(url: &str, container: &str, blob_path: Option<&str>) -> BlobResult<Self> {
        let (object_store, base) = build_object_store(url)?;
        Ok(Self::new(
            Arc::from(object_store),
            base,
            container,
            blob_path,
        ))
    }

    /// Sizes of the committed blocks of `id`, in append order.
    pub async fn block_sizes(&self, id: &str) -> BlobResult<Vec<u64>> {
        Ok(self
            .list_blocks(id)
            .await?
            .into_iter()
            .map(|meta| meta.size as u64)
            .collect())
    }

    fn record_dir(&self, id: &str) -> Path {
        self.records_root.child(id)
    }

    fn properties_path(&self, id: &str) -> Path {
        self.record_dir(id).child(PROPERTIES_FILE)
    }

    fn blocks_dir(&self, id: &str) -> Path {
        self.record_dir(id).child(BLOCKS_DIR)
    }

    fn tags_path(&self, id: &str) -> Path {
        self.tags_root.child(id)
    }

    async fn list_blocks(&self, id: &str) -> BlobResult<Vec<ObjectMeta>> {
        let prefix = self.blocks_dir(id);
        let mut blocks: Vec<ObjectMeta> = self
            .object_store
            .list(Some(&prefix))
            .try_collect()
            .await?;
        // Sequence numbers are zero padded, so lexical order is append order.
        blocks.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(blocks)
    }

    async fn ensure_exists(&self, id: &str) -> BlobResult<()> {
        self.object_store.head(&self.properties_path(id)).await?;
        Ok(())
    }

    async fn read_map(&self, path: &Path) -> BlobResult<HashMap<String, String>> {
        self.read_json(path).await
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> BlobResult<T> {
        let bytes = self.object_store.get(path).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BlobError::Corrupted {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn put_json<T: Serialize + Sync>(
        &self,
        path: &Path,
        value: &T,
        mode: PutMode,
    ) -> BlobResult<bool> {
        let payload = PutPayload::from(serde_json::to_vec(value)?);
        let opts = PutOptions {
            mode,
            ..Default::default()
        };
        match self.object_store.put_opts(path, payload, opts).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_path(&self, path: &Path) -> BlobResult<()> {
        match self.object_store.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn join(base: &Path, relative: &str) -> Path {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(base.clone(), |path, part| path.child(part))
}

fn next_block_sequence(blocks: &[ObjectMeta]) -> u64 {
    blocks
        .iter()
        .filter_map(|meta| meta.location.filename()?.parse::<u64>().ok())
        .max()
        .map_or(0, |last| last + 1)
}

#[async_trait]
impl AppendBlobStore for ObjectStoreAppendBlobs {
    async fn create_container_if_absent(&self, public: bool) -> BlobResult<bool> {
        let marker = self.container_root.child(CONTAINER_MARKER);
        let created = self
            .put_json(&marker, &ContainerMarker { public }, PutMode::Create)
            .await?;
        if created {
            info!(container = %self.container_root, public, "created container");
        }
        Ok(created)
    }

    async fn create_if_absent(
        &self,
        id: &str,
        metadata: HashMap<String, String>,
    ) -> BlobResult<bool> {
        if id.is_empty() {
            return Err(BlobError::InvalidId { id: id.to_string() });
        }
        self.put_json(&self.properties_path(id), &metadata, PutMode::Create)
            .await
    }

    async fn get_metadata(&self, id: &str) -> BlobResult<HashMap<String, String>> {
        self.read_map(&self.properties_path(id)).await
    }

    async fn set_metadata(&self, id: &str, metadata: HashMap<String, String>) -> BlobResult<()> {
        let path = self.properties_path(id);
        self.object_store.head(&path).await?;
        self.put_json(&path, &metadata, PutMode::Overwrite).await?;
        Ok(())
    }

    async fn set_tags(&self, id: &str, tags: HashMap<String, String>) -> BlobResult<()> {
        self.ensure_exists(id).await?;
        let entry = TagEntry {
            id: id.to_string(),
            tags,
        };
        self.put_json(&self.tags_path(id), &entry, PutMode::Overwrite)
            .await?;
        Ok(())
    }

    async fn get_tags(&self, id: &str) -> BlobResult<HashMap<String, String>> {
        self.ensure_exists(id).await?;
        match self.read_json::<TagEntry>(&self.tags_path(id)).await {
            Ok(entry) => Ok(entry.tags),
            Err(BlobError::NotFound { .. }) => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }

    async fn find_by_tag_query(&self, query: &TagQuery) -> BlobResult<Vec<String>> {
        let entries: Vec<ObjectMeta> = self
            .object_store
            .list(Some(&self.tags_root))
            .try_collect()
            .await?;

        let mut ids = Vec::new();
        for entry in entries {
            let tag_entry = match self.read_json::<TagEntry>(&entry.location).await {
                Ok(tag_entry) => tag_entry,
                // Deleted between listing and reading.
                Err(BlobError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if query.matches(&tag_entry.tags) {
                ids.push(tag_entry.id);
            }
        }
        debug!(query = %query, matches = ids.len(), "tag query");
        Ok(ids)
    }

    async fn append_block(&self, id: &str, block: Bytes, md5: [u8; 16]) -> BlobResult<()> {
        let computed: [u8; 16] = Md5::digest(&block).into();
        if computed != md5 {
            return Err(BlobError::ChecksumMismatch {
                path: self.record_dir(id).to_string(),
                expected: hex(&md5),
                actual: hex(&computed),
            });
        }

        self.ensure_exists(id).await?;
        let blocks = self.list_blocks(id).await?;
        let sequence = next_block_sequence(&blocks);
        let path = self.blocks_dir(id).child(format!("{:020}", sequence));
        let size = block.len();
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        match self
            .object_store
            .put_opts(&path, PutPayload::from(block), opts)
            .await
        {
            Ok(_) => {
                debug!(id, sequence, size, "appended block");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { path, .. }) => Err(BlobError::Other {
                source: anyhow::anyhow!("concurrent append detected, block {} already exists", path),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, id: &str) -> BlobResult<bool> {
        match self.ensure_exists(id).await {
            Ok(()) => Ok(true),
            Err(BlobError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_if_exists(&self, id: &str) -> BlobResult<bool> {
        let existed = self.exists(id).await?;
        for block in self.list_blocks(id).await? {
            self.delete_path(&block.location).await?;
        }
        self.delete_path(&self.tags_path(id)).await?;
        // Properties go last so a partially deleted record is still visible and
        // a retry finishes the job.
        self.delete_path(&self.properties_path(id)).await?;
        if existed {
            debug!(id, "deleted blob");
        }
        Ok(existed)
    }

    async fn open_read(&self, id: &str) -> BlobResult<BoxStream<'static, BlobResult<Bytes>>> {
        self.ensure_exists(id).await?;
        let blocks = self.list_blocks(id).await?;
        let object_store = self.object_store.clone();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for block in blocks {
                let result = match object_store.get(&block.location).await {
                    Ok(get_result) => get_result.bytes().await.map_err(BlobError::from),
                    Err(e) => Err(BlobError::from(e)),
                };
                let failed = result.is_err();
                if tx.send(result).await.is_err() || failed {
                    return;
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
