//! Removal of expired uploads.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::{
    config::UploadStoreConfig,
    error::{Result, UploadStoreError},
    store::UploadStore,
};

/// Outcome of one pass over the expired uploads.
#[derive(Debug, Default)]
pub struct ReapReport {
    /// Number of deletions that were run.
    pub attempted: usize,
    pub removed: Vec<String>,
    /// Listed as expired but already gone.
    pub missing: Vec<String>,
    pub failed: Vec<(String, UploadStoreError)>,
}

impl ReapReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every upload that expired before `now`, running at most
/// `parallelism` deletions at a time. A failed deletion is recorded in the
/// report and doesn't stop the others.
pub(crate) async fn remove_expired(
    store: &UploadStore,
    now: DateTime<Utc>,
    parallelism: usize,
) -> Result<ReapReport> {
    let expired = store.get_expired_files(now).await?;
    let mut report = ReapReport::default();
    if expired.is_empty() {
        return Ok(report);
    }
    debug!(count = expired.len(), "removing expired uploads");

    let mut deletions = stream::iter(expired)
        .map(|id| async move {
            let result = store.delete_file(&id).await;
            (id, result)
        })
        .buffer_unordered(parallelism.max(1));

    while let Some((id, result)) = deletions.next().await {
        report.attempted += 1;
        match result {
            Ok(true) => report.removed.push(id),
            Ok(false) => report.missing.push(id),
            Err(e) => {
                error!(id = %id, error = %e, "failed to remove expired upload");
                report.failed.push((id, e));
            }
        }
    }

    info!(
        attempted = report.attempted,
        removed = report.removed.len(),
        failed = report.failed.len(),
        "removed expired uploads"
    );
    Ok(report)
}

/// Periodically removes expired uploads until shut down.
pub struct Reaper {
    store: Arc<UploadStore>,
    interval: Duration,
    shutdown_rx: watch::Receiver<()>,
}

impl Reaper {
    pub fn new(
        store: Arc<UploadStore>,
        interval: Duration,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self {
            store,
            interval,
            shutdown_rx,
        }
    }

    /// Reaper running every `reap_interval_secs` of `config`.
    pub fn from_config(
        store: Arc<UploadStore>,
        config: &UploadStoreConfig,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self::new(store, config.reap_interval(), shutdown_rx)
    }

    pub async fn start(&mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.store.remove_expired_files(Utc::now()).await {
                        error!(error = %e, "error removing expired uploads");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("shutdown signal received, stopping reaper");
                    return;
                }
            }
        }
    }
}
