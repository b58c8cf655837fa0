//! One-time initialization of the backing container.
//!
//! Initialization state is tracked per `(connection target, container)` in a
//! [`ContainerRegistry`]. Every key owns an async one-shot cell, so concurrent
//! callers for the same container share a single create call while distinct
//! containers used by one process are initialized independently.

use std::{sync::Arc, time::Duration};

use blob_store::AppendBlobStore;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::{Result, UploadStoreError};

static GLOBAL_REGISTRY: Lazy<Arc<ContainerRegistry>> =
    Lazy::new(|| Arc::new(ContainerRegistry::new()));

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerKey {
    pub target: String,
    pub container: String,
}

impl ContainerKey {
    pub fn new(target: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            container: container.into(),
        }
    }
}

/// Tracks which containers have been initialized.
#[derive(Default)]
pub struct ContainerRegistry {
    cells: DashMap<ContainerKey, Arc<OnceCell<()>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every store that isn't given its own.
    pub fn global() -> Arc<ContainerRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn is_initialized(&self, key: &ContainerKey) -> bool {
        self.cells
            .get(key)
            .is_some_and(|cell| cell.initialized())
    }

    fn cell(&self, key: &ContainerKey) -> Arc<OnceCell<()>> {
        self.cells.entry(key.clone()).or_default().clone()
    }
}

pub struct ContainerInitializer {
    key: ContainerKey,
    public: bool,
    timeout: Duration,
    registry: Arc<ContainerRegistry>,
    blobs: Arc<dyn AppendBlobStore>,
}

impl ContainerInitializer {
    pub fn new(
        key: ContainerKey,
        public: bool,
        timeout: Duration,
        registry: Arc<ContainerRegistry>,
        blobs: Arc<dyn AppendBlobStore>,
    ) -> Self {
        Self {
            key,
            public,
            timeout,
            registry,
            blobs,
        }
    }

    pub fn key(&self) -> &ContainerKey {
        &self.key
    }

    pub(crate) fn with_registry(mut self, registry: Arc<ContainerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Make sure the container exists.
    ///
    /// Waiting for initialization is bounded by the configured timeout, which
    /// surfaces as `UploadStoreError::ContainerInitTimeout`. A failed create
    /// leaves the container uninitialized so the next call tries again.
    pub async fn ensure_exists(&self) -> Result<()> {
        let cell = self.registry.cell(&self.key);
        if cell.initialized() {
            return Ok(());
        }

        let init = cell.get_or_try_init(|| async {
            let created = self.blobs.create_container_if_absent(self.public).await?;
            info!(
                target_url = %self.key.target,
                container = %self.key.container,
                created,
                "container initialized"
            );
            Ok::<(), UploadStoreError>(())
        });

        match tokio::time::timeout(self.timeout, init).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(UploadStoreError::ContainerInitTimeout {
                container: self.key.container.clone(),
                timeout: self.timeout,
            }),
        }
    }
}
