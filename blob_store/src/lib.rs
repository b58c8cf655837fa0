//! Append-blob storage primitives for resumable uploads.
//!
//! This crate provides the backing-store contract the upload store is built
//! on: append-only blobs with a string metadata map, a queryable tag map and
//! block-level checksum validation.
//!
//! - [`AppendBlobStore`] is the trait every backend implements.
//! - [`ObjectStoreAppendBlobs`] emulates append blobs on any `object_store`
//!   backend (local filesystem, in-memory, S3, Azure).
//! - [`TagQuery`] describes the tag predicates used to find blobs.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//!
//! use blob_store::{AppendBlobStore, ObjectStoreAppendBlobs, TagQuery};
//!
//! # async fn example() -> Result<(), blob_store::BlobError> {
//! let blobs = ObjectStoreAppendBlobs::from_url("file:///var/uploads", "uploads", None)?;
//! blobs.create_container_if_absent(false).await?;
//! blobs.create_if_absent("some-id", HashMap::new()).await?;
//!
//! let expired = blobs
//!     .find_by_tag_query(&TagQuery::less_than("ExpiresAt", "2024-01-01T00:00:00"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backends;
mod config;
mod error;
mod tags;
mod traits;

pub use backends::object_store_blobs::ObjectStoreAppendBlobs;
pub use config::build_object_store;
pub use error::{BlobError, BlobResult};
pub use tags::{TagClause, TagOp, TagQuery};
pub use traits::AppendBlobStore;
