//! Append-blob backend implementations.

pub mod object_store_blobs;
