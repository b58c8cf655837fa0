use std::{
    collections::{HashMap, HashSet},
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use blob_store::{AppendBlobStore, BlobError, BlobResult, ObjectStoreAppendBlobs, TagQuery};
use bytes::Bytes;
use futures::{stream::BoxStream, TryStreamExt};
use object_store::{memory::InMemory, path::Path};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    config::UploadStoreConfig,
    container::ContainerRegistry,
    store::{UploadFile, UploadStore},
};

pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
    );
}

fn memory_object_blobs() -> ObjectStoreAppendBlobs {
    ObjectStoreAppendBlobs::new(Arc::new(InMemory::new()), Path::default(), "uploads", None)
}

pub fn memory_blobs() -> Arc<dyn AppendBlobStore> {
    Arc::new(memory_object_blobs())
}

/// In-memory blobs with call counters and injectable failures.
pub struct InstrumentedBlobs {
    inner: ObjectStoreAppendBlobs,
    pub container_creates: AtomicUsize,
    pub appends: AtomicUsize,
    /// Number of appends that succeed before every further one fails.
    append_budget: Mutex<Option<usize>>,
    pub max_concurrent_deletes: AtomicUsize,
    in_flight_deletes: AtomicUsize,
    container_failures: AtomicUsize,
    container_delay: Mutex<Duration>,
    delete_delay: Mutex<Duration>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl InstrumentedBlobs {
    pub fn memory() -> Arc<Self> {
        Arc::new(Self::wrap(memory_object_blobs()))
    }

    fn wrap(inner: ObjectStoreAppendBlobs) -> Self {
        Self {
            inner,
            container_creates: AtomicUsize::new(0),
            appends: AtomicUsize::new(0),
            append_budget: Mutex::new(None),
            max_concurrent_deletes: AtomicUsize::new(0),
            in_flight_deletes: AtomicUsize::new(0),
            container_failures: AtomicUsize::new(0),
            container_delay: Mutex::new(Duration::ZERO),
            delete_delay: Mutex::new(Duration::ZERO),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &ObjectStoreAppendBlobs {
        &self.inner
    }

    pub fn set_container_delay(&self, delay: Duration) {
        *self.container_delay.lock().unwrap() = delay;
    }

    pub fn fail_container_creates(&self, times: usize) {
        self.container_failures.store(times, Ordering::SeqCst);
    }

    pub fn set_delete_delay(&self, delay: Duration) {
        *self.delete_delay.lock().unwrap() = delay;
    }

    pub fn fail_appends_after(&self, successes: usize) {
        *self.append_budget.lock().unwrap() = Some(successes);
    }

    pub fn fail_deletes_of(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    fn injected(what: &str) -> BlobError {
        BlobError::Other {
            source: anyhow::anyhow!("injected {} failure", what),
        }
    }
}

#[async_trait]
impl AppendBlobStore for InstrumentedBlobs {
    async fn create_container_if_absent(&self, public: bool) -> BlobResult<bool> {
        self.container_creates.fetch_add(1, Ordering::SeqCst);
        let delay = *self.container_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let fail = self
            .container_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Self::injected("container"));
        }
        self.inner.create_container_if_absent(public).await
    }

    async fn create_if_absent(
        &self,
        id: &str,
        metadata: HashMap<String, String>,
    ) -> BlobResult<bool> {
        self.inner.create_if_absent(id, metadata).await
    }

    async fn get_metadata(&self, id: &str) -> BlobResult<HashMap<String, String>> {
        self.inner.get_metadata(id).await
    }

    async fn set_metadata(&self, id: &str, metadata: HashMap<String, String>) -> BlobResult<()> {
        self.inner.set_metadata(id, metadata).await
    }

    async fn set_tags(&self, id: &str, tags: HashMap<String, String>) -> BlobResult<()> {
        self.inner.set_tags(id, tags).await
    }

    async fn get_tags(&self, id: &str) -> BlobResult<HashMap<String, String>> {
        self.inner.get_tags(id).await
    }

    async fn find_by_tag_query(&self, query: &TagQuery) -> BlobResult<Vec<String>> {
        self.inner.find_by_tag_query(query).await
    }

    async fn append_block(&self, id: &str, block: Bytes, md5: [u8; 16]) -> BlobResult<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        {
            let mut budget = self.append_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => return Err(Self::injected("append")),
                Some(left) => *left -= 1,
                None => {}
            }
        }
        self.inner.append_block(id, block, md5).await
    }

    async fn exists(&self, id: &str) -> BlobResult<bool> {
        self.inner.exists(id).await
    }

    async fn delete_if_exists(&self, id: &str) -> BlobResult<bool> {
        let in_flight = self.in_flight_deletes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_deletes
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.delete_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let fail = self.failing_deletes.lock().unwrap().contains(id);
        let result = if fail {
            Err(Self::injected("delete"))
        } else {
            self.inner.delete_if_exists(id).await
        };

        self.in_flight_deletes.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn open_read(&self, id: &str) -> BlobResult<BoxStream<'static, BlobResult<Bytes>>> {
        self.inner.open_read(id).await
    }
}

/// Builds stores over [`InstrumentedBlobs`] with a private container
/// registry.
pub struct TestStore {
    pub blobs: Arc<InstrumentedBlobs>,
    pub object_blobs: ObjectStoreAppendBlobs,
    config: UploadStoreConfig,
}

impl TestStore {
    pub fn new() -> Self {
        init_tracing();
        let blobs = InstrumentedBlobs::memory();
        Self {
            object_blobs: blobs.inner().clone(),
            blobs,
            config: UploadStoreConfig::default(),
        }
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn max_delete_parallelism(mut self, parallelism: usize) -> Self {
        self.config.max_delete_parallelism = parallelism;
        self
    }

    pub fn build(&self) -> UploadStore {
        UploadStore::with_blobs(&self.config, self.blobs.clone())
            .with_container_registry(Arc::new(ContainerRegistry::new()))
    }
}

pub async fn read_content(file: &UploadFile) -> Vec<u8> {
    let chunks: Vec<Bytes> = file
        .content()
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    chunks.concat()
}

/// Serves `data` in pieces of at most `chunk` bytes and cancels `cancel` as
/// soon as `cancel_after` bytes have been handed out.
pub struct CancellingReader<'a> {
    data: &'a [u8],
    chunk: usize,
    cancel_after: usize,
    emitted: usize,
    cancel: CancellationToken,
}

impl<'a> CancellingReader<'a> {
    pub fn new(
        data: &'a [u8],
        chunk: usize,
        cancel_after: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            data,
            chunk,
            cancel_after,
            emitted: 0,
            cancel,
        }
    }
}

impl AsyncRead for CancellingReader<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let start = self.emitted;
        let n = self
            .chunk
            .min(buf.remaining())
            .min(self.data.len() - start);
        buf.put_slice(&self.data[start..start + n]);
        self.emitted += n;
        if self.emitted >= self.cancel_after {
            self.cancel.cancel();
        }
        Poll::Ready(Ok(()))
    }
}

/// Serves `data`, then fails every further read.
pub struct FailingReader<'a> {
    data: &'a [u8],
}

impl<'a> FailingReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl AsyncRead for FailingReader<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.data.is_empty() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "client went away",
            )));
        }
        let n = self.data.len().min(buf.remaining());
        buf.put_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Poll::Ready(Ok(()))
    }
}

/// Reader that must never be polled.
pub struct PanicReader;

impl AsyncRead for PanicReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        panic!("reader should not have been read");
    }
}
