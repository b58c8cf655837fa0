//! Chunked append path.
//!
//! Incoming bytes are buffered into fixed-size blocks. Every full block is
//! hashed and appended as soon as it fills; whatever is left when the reader
//! is exhausted or the call is cancelled goes out as one final partial block.

use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use blob_store::AppendBlobStore;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    checksum::md5_digest,
    error::{Result, UploadStoreError},
    metrics::UploadStoreMetrics,
    record::UploadRecord,
};

const MAX_IDLE_BUFFERS: usize = 8;

/// Reusable block buffers of a fixed size.
pub(crate) struct BufferPool {
    block_size: usize,
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            block_size,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn lease(&self) -> PooledBuffer<'_> {
        let buffer = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_else(|| vec![0; self.block_size]);
        PooledBuffer {
            pool: self,
            buffer: Some(buffer),
        }
    }

    fn give_back(&self, buffer: Vec<u8>) {
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < MAX_IDLE_BUFFERS {
            idle.push(buffer);
        }
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// A leased buffer, returned to its pool when dropped.
pub(crate) struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<Vec<u8>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}

pub struct ChunkedWriter {
    blobs: Arc<dyn AppendBlobStore>,
    block_size: usize,
    pool: BufferPool,
    metrics: UploadStoreMetrics,
}

impl ChunkedWriter {
    pub fn new(
        blobs: Arc<dyn AppendBlobStore>,
        block_size: usize,
        metrics: UploadStoreMetrics,
    ) -> Self {
        Self {
            blobs,
            block_size,
            pool: BufferPool::new(block_size),
            metrics,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Append everything `reader` yields to the upload `id`.
    ///
    /// Returns the number of bytes written by this call. Cancellation is
    /// checked before every read; bytes read up to that point are flushed and
    /// counted. Reading past the declared upload length fails with
    /// `UploadStoreError::Overflow` and leaves the stored offset untouched.
    pub async fn append_data<R>(
        &self,
        id: &str,
        reader: &mut R,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut metadata = self.blobs.get_metadata(id).await?;
        let mut record = UploadRecord::from_metadata(id, &metadata)?;
        if record.is_complete() {
            debug!(id, "upload already complete");
            return Ok(0);
        }

        let mut buffer = self.pool.lease();
        let mut buffered = 0;
        let mut total = record.offset;
        let mut written = 0u64;
        let mut last_digest = None;

        loop {
            if cancel.is_cancelled() {
                info!(id, written, "append cancelled");
                break;
            }

            let n = reader
                .read(&mut buffer[buffered..])
                .await
                .map_err(|source| UploadStoreError::Read {
                    id: id.to_string(),
                    source,
                })?;
            if n == 0 {
                break;
            }

            written += n as u64;
            total += n as u64;
            if total > record.upload_length {
                return Err(UploadStoreError::Overflow {
                    id: id.to_string(),
                    total,
                    upload_length: record.upload_length,
                });
            }

            buffered += n;
            if buffered == self.block_size {
                last_digest = Some(self.flush(id, &buffer[..buffered]).await?);
                buffered = 0;
            }
        }

        if buffered > 0 {
            last_digest = Some(self.flush(id, &buffer[..buffered]).await?);
        }
        drop(buffer);

        record.offset += written;
        if let Some(digest) = last_digest {
            record.last_block_checksum = Some(digest.to_vec());
        }
        metadata.extend(record.to_metadata());
        self.blobs.set_metadata(id, metadata).await?;

        self.metrics.bytes_appended.add(written, &[]);
        debug!(id, written, offset = record.offset, "append finished");
        Ok(written)
    }

    async fn flush(&self, id: &str, block: &[u8]) -> Result<[u8; 16]> {
        let digest = md5_digest(block);
        self.blobs
            .append_block(id, Bytes::copy_from_slice(block), digest)
            .await?;
        self.metrics.blocks_flushed.add(1, &[]);
        debug!(id, size = block.len(), "flushed block");
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use blob_store::BlobError;

    use super::*;
    use crate::testing::{FailingReader, InstrumentedBlobs};

    async fn writer_with_upload(
        block_size: usize,
        upload_length: u64,
    ) -> (Arc<InstrumentedBlobs>, ChunkedWriter) {
        let blobs = InstrumentedBlobs::memory();
        let record = UploadRecord::new("upload", upload_length, "");
        blobs
            .create_if_absent("upload", record.to_metadata())
            .await
            .unwrap();
        let writer = ChunkedWriter::new(blobs.clone(), block_size, UploadStoreMetrics::global());
        (blobs, writer)
    }

    async fn stored_offset(blobs: &InstrumentedBlobs) -> u64 {
        let metadata = blobs.get_metadata("upload").await.unwrap();
        UploadRecord::from_metadata("upload", &metadata)
            .unwrap()
            .offset
    }

    #[tokio::test]
    async fn test_read_error_keeps_offset_and_returns_buffer() {
        let (blobs, writer) = writer_with_upload(4, 10).await;
        let mut reader = FailingReader::new(b"abcdef");

        let err = writer
            .append_data("upload", &mut reader, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            UploadStoreError::Read { id, source }
                if id == "upload" && source.kind() == std::io::ErrorKind::ConnectionReset
        ));
        assert_eq!(stored_offset(&blobs).await, 0);
        // The full block went out before the read failed, the tail did not.
        assert_eq!(blobs.inner().block_sizes("upload").await.unwrap(), vec![4]);
        assert_eq!(writer.pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_append_failure_propagates_backend_error() {
        let (blobs, writer) = writer_with_upload(4, 10).await;
        blobs.fail_appends_after(1);

        let err = writer
            .append_data("upload", &mut &b"abcdefgh"[..], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            UploadStoreError::Blob { source: BlobError::Other { source } }
                if source.to_string() == "injected append failure"
        ));
        assert_eq!(blobs.appends.load(Ordering::SeqCst), 2);
        assert_eq!(stored_offset(&blobs).await, 0);
        assert_eq!(blobs.inner().block_sizes("upload").await.unwrap(), vec![4]);
        assert_eq!(writer.pool.idle_count(), 1);
    }

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(16);
        {
            let mut buffer = pool.lease();
            assert_eq!(buffer.len(), 16);
            buffer[0] = 7;
        }
        assert_eq!(pool.idle_count(), 1);

        let buffer = pool.lease();
        assert_eq!(buffer[0], 7);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_idle_buffers_are_bounded() {
        let pool = BufferPool::new(4);
        let leased: Vec<_> = (0..MAX_IDLE_BUFFERS + 2).map(|_| pool.lease()).collect();
        drop(leased);
        assert_eq!(pool.idle_count(), MAX_IDLE_BUFFERS);
    }
}
