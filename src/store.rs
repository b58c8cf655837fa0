//! The upload store facade consumed by resumable-upload front ends.

use std::sync::Arc;

use blob_store::{AppendBlobStore, ObjectStoreAppendBlobs};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    checksum::{self, ChecksumAlgorithm},
    config::{MetadataParsingStrategy, UploadStoreConfig},
    container::{ContainerInitializer, ContainerKey, ContainerRegistry},
    error::{Result, UploadStoreError},
    expiration::{ExpirationIndex, TagExpirationIndex},
    id::{IdGenerator, UuidIdGenerator},
    metrics::UploadStoreMetrics,
    reaper::{self, ReapReport},
    record::UploadRecord,
    writer::ChunkedWriter,
};

pub struct UploadStore {
    blobs: Arc<dyn AppendBlobStore>,
    container: ContainerInitializer,
    writer: ChunkedWriter,
    expiration: Arc<dyn ExpirationIndex>,
    id_generator: Arc<dyn IdGenerator>,
    metadata_parsing: MetadataParsingStrategy,
    max_delete_parallelism: usize,
    metrics: UploadStoreMetrics,
}

impl UploadStore {
    /// Connect to the backing store named by `config.connection`.
    pub fn new(config: &UploadStoreConfig) -> Result<Self> {
        let blobs = ObjectStoreAppendBlobs::from_url(
            &config.connection,
            &config.container,
            config.blob_path.as_deref(),
        )?;
        Ok(Self::with_blobs(config, Arc::new(blobs)))
    }

    pub fn with_blobs(config: &UploadStoreConfig, blobs: Arc<dyn AppendBlobStore>) -> Self {
        let metrics = UploadStoreMetrics::global();
        let container = ContainerInitializer::new(
            ContainerKey::new(config.connection.clone(), config.container.clone()),
            config.public_container,
            config.container_init_timeout(),
            ContainerRegistry::global(),
            blobs.clone(),
        );
        Self {
            writer: ChunkedWriter::new(blobs.clone(), config.block_size, metrics.clone()),
            expiration: Arc::new(TagExpirationIndex::new(blobs.clone())),
            id_generator: Arc::new(UuidIdGenerator),
            container,
            blobs,
            metadata_parsing: config.metadata_parsing,
            max_delete_parallelism: config.max_delete_parallelism,
            metrics,
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_expiration_index(mut self, expiration: Arc<dyn ExpirationIndex>) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_container_registry(mut self, registry: Arc<ContainerRegistry>) -> Self {
        self.container = self.container.with_registry(registry);
        self
    }

    pub fn with_metrics(mut self, metrics: UploadStoreMetrics) -> Self {
        self.writer = ChunkedWriter::new(
            self.blobs.clone(),
            self.writer.block_size(),
            metrics.clone(),
        );
        self.metrics = metrics;
        self
    }

    /// Create an empty upload of `upload_length` bytes and return its id.
    pub async fn create_file(&self, upload_length: u64, raw_metadata: &str) -> Result<String> {
        let _timer = self.metrics.timer("create_file");
        self.container.ensure_exists().await?;

        let id = self.id_generator.generate(raw_metadata).await?;
        let record = UploadRecord::new(id.clone(), upload_length, raw_metadata);
        if !self.blobs.create_if_absent(&id, record.to_metadata()).await? {
            self.metrics.error("create_file");
            warn!(id = %id, "generated upload id already exists");
            return Err(UploadStoreError::FileAlreadyExists { id });
        }

        info!(id = %id, upload_length, "created upload");
        Ok(id)
    }

    /// Load and validate the stored record.
    pub async fn get_record(&self, id: &str) -> Result<UploadRecord> {
        self.container.ensure_exists().await?;
        let metadata = self.blobs.get_metadata(id).await?;
        UploadRecord::from_metadata(id, &metadata)
    }

    pub async fn get_upload_length(&self, id: &str) -> Result<u64> {
        Ok(self.get_record(id).await?.upload_length)
    }

    pub async fn get_upload_offset(&self, id: &str) -> Result<u64> {
        Ok(self.get_record(id).await?.offset)
    }

    /// Raw client metadata, exactly as it was given to `create_file`.
    pub async fn get_upload_metadata(&self, id: &str) -> Result<String> {
        Ok(self.get_record(id).await?.raw_metadata)
    }

    pub async fn file_exists(&self, id: &str) -> Result<bool> {
        self.container.ensure_exists().await?;
        Ok(self.blobs.exists(id).await?)
    }

    /// Delete an upload. Returns `false` if there was nothing to delete.
    pub async fn delete_file(&self, id: &str) -> Result<bool> {
        let _timer = self.metrics.timer("delete_file");
        self.container.ensure_exists().await?;
        let deleted = self.blobs.delete_if_exists(id).await.inspect_err(|_| {
            self.metrics.error("delete_file");
        })?;
        if deleted {
            info!(id, "deleted upload");
        }
        Ok(deleted)
    }

    /// Handle for reading a stored upload, `None` if it doesn't exist.
    pub async fn get_file(&self, id: &str) -> Result<Option<UploadFile>> {
        match self.get_record(id).await {
            Ok(record) => Ok(Some(UploadFile {
                id: record.id,
                raw_metadata: record.raw_metadata,
                metadata_parsing: self.metadata_parsing,
                blobs: self.blobs.clone(),
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Append the bytes `reader` yields. See [`ChunkedWriter::append_data`].
    pub async fn append_data<R>(
        &self,
        id: &str,
        reader: &mut R,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let _timer = self.metrics.timer("append_data");
        self.container.ensure_exists().await?;
        self.writer
            .append_data(id, reader, cancel)
            .await
            .inspect_err(|_| self.metrics.error("append_data"))
    }

    pub fn supported_algorithms(&self) -> Vec<&'static str> {
        checksum::supported_algorithms()
    }

    /// Compare `checksum` with the digest of the last block flushed for `id`.
    pub async fn verify_checksum(
        &self,
        id: &str,
        algorithm: &str,
        checksum: &[u8],
    ) -> Result<bool> {
        let algorithm: ChecksumAlgorithm = algorithm.parse()?;
        let record = self.get_record(id).await?;
        let matches = record
            .last_block_checksum
            .as_deref()
            .is_some_and(|stored| stored == checksum);
        if !matches {
            info!(id, %algorithm, "checksum mismatch");
        }
        Ok(matches)
    }

    pub async fn set_expiration(&self, id: &str, expires: DateTime<Utc>) -> Result<()> {
        self.container.ensure_exists().await?;
        self.expiration.set_expiration(id, expires).await
    }

    pub async fn get_expiration(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        self.container.ensure_exists().await?;
        self.expiration.get_expiration(id).await
    }

    pub async fn get_expired_files(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.container.ensure_exists().await?;
        self.expiration.get_expired_files(now).await
    }

    /// Delete every upload that expired before `now`.
    pub async fn remove_expired_files(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let _timer = self.metrics.timer("remove_expired_files");
        let report = reaper::remove_expired(self, now, self.max_delete_parallelism).await?;
        self.metrics
            .files_reaped
            .add(report.removed.len() as u64, &[]);
        Ok(report)
    }
}

/// A stored upload opened for reading.
pub struct UploadFile {
    id: String,
    raw_metadata: String,
    metadata_parsing: MetadataParsingStrategy,
    blobs: Arc<dyn AppendBlobStore>,
}

impl UploadFile {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raw_metadata(&self) -> &str {
        &self.raw_metadata
    }

    /// How the front end should decode `raw_metadata`.
    pub fn metadata_parsing(&self) -> MetadataParsingStrategy {
        self.metadata_parsing
    }

    /// Stream the persisted bytes in append order.
    pub async fn content(&self) -> Result<BoxStream<'static, Result<Bytes>>> {
        let stream = self.blobs.open_read(&self.id).await?;
        Ok(stream.map_err(UploadStoreError::from).boxed())
    }
}
