//! Metrics for upload store operations.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

/// Metrics for upload store operations.
#[derive(Clone)]
pub struct UploadStoreMetrics {
    /// Histogram for operation latencies.
    pub operations: Histogram<f64>,

    /// Counter for operation errors.
    pub errors: Counter<u64>,

    /// Bytes accepted by append calls.
    pub bytes_appended: Counter<u64>,

    /// Blocks flushed to the backing store.
    pub blocks_flushed: Counter<u64>,

    /// Records deleted by the reaper.
    pub files_reaped: Counter<u64>,
}

impl UploadStoreMetrics {
    /// Create new metrics from a meter.
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("upload_store_operation_duration_seconds")
            .with_description("Duration of upload store operations in seconds")
            .build();

        let errors = meter
            .u64_counter("upload_store_errors_total")
            .with_description("Total number of upload store errors")
            .build();

        let bytes_appended = meter
            .u64_counter("upload_store_appended_bytes_total")
            .with_description("Total number of bytes appended to uploads")
            .build();

        let blocks_flushed = meter
            .u64_counter("upload_store_flushed_blocks_total")
            .with_description("Total number of blocks flushed to the backing store")
            .build();

        let files_reaped = meter
            .u64_counter("upload_store_reaped_files_total")
            .with_description("Total number of expired uploads deleted")
            .build();

        Self {
            operations,
            errors,
            bytes_appended,
            blocks_flushed,
            files_reaped,
        }
    }

    /// Metrics registered on the global meter provider.
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter("upload_store"))
    }

    pub(crate) fn timer(&self, op: &'static str) -> Timer {
        Timer::start(&self.operations, op)
    }

    pub(crate) fn error(&self, op: &'static str) {
        self.errors.add(1, &[KeyValue::new("op", op)]);
    }
}

/// Records how long one store operation took when dropped.
pub struct Timer {
    started: Instant,
    histogram: Histogram<f64>,
    op: KeyValue,
}

impl Timer {
    pub fn start(histogram: &Histogram<f64>, op: &'static str) -> Self {
        Self {
            started: Instant::now(),
            histogram: histogram.clone(),
            op: KeyValue::new("op", op),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.histogram.record(
            self.started.elapsed().as_secs_f64(),
            std::slice::from_ref(&self.op),
        );
    }
}
