//! Storage for resumable uploads on top of append-only blobs.
//!
//! An upload is created with a declared length and filled by any number of
//! [`UploadStore::append_data`] calls, each of which may be cut short by the
//! client or cancelled. The store persists how many bytes have been written,
//! never accepts more than the declared length, and keeps a digest of the
//! last block it flushed so clients can verify a chunk after sending it.
//! Abandoned uploads are tagged with an expiry and removed by the [`Reaper`].
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use upload_store::{UploadStore, UploadStoreConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = UploadStoreConfig::from_path("upload_store.yaml")?;
//! let store = UploadStore::new(&config)?;
//!
//! let id = store.create_file(11, "filename aGVsbG8udHh0").await?;
//! let written = store
//!     .append_data(&id, &mut &b"hello world"[..], &CancellationToken::new())
//!     .await?;
//! assert_eq!(written, 11);
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod config;
pub mod container;
pub mod error;
pub mod expiration;
pub mod id;
pub mod metrics;
pub mod reaper;
pub mod record;
pub mod store;
pub mod writer;

#[cfg(test)]
mod testing;

pub use checksum::{compute_digest, supported_algorithms, ChecksumAlgorithm};
pub use config::{MetadataParsingStrategy, UploadStoreConfig};
pub use container::{ContainerInitializer, ContainerKey, ContainerRegistry};
pub use error::{Result, UploadStoreError};
pub use expiration::{ExpirationIndex, NullExpirationIndex, TagExpirationIndex};
pub use id::{FnIdGenerator, IdGenerator, UuidIdGenerator};
pub use metrics::UploadStoreMetrics;
pub use reaper::{ReapReport, Reaper};
pub use record::UploadRecord;
pub use store::{UploadFile, UploadStore};
pub use writer::ChunkedWriter;
