use std::time::Duration;

use blob_store::BlobError;

pub type Result<T, E = UploadStoreError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum UploadStoreError {
    #[error(
        "Stream contains more data than the file's upload length. Stream data: {}, upload length: {}, file: {}",
        total,
        upload_length,
        id
    )]
    Overflow {
        id: String,
        total: u64,
        upload_length: u64,
    },

    #[error("Unsupported checksum algorithm: {}", algorithm)]
    UnsupportedAlgorithm { algorithm: String },

    #[error(
        "Timed out after {:?} waiting for container {} to be initialized",
        timeout,
        container
    )]
    ContainerInitTimeout { container: String, timeout: Duration },

    #[error("File already exists: {}", id)]
    FileAlreadyExists { id: String },

    #[error("Invalid upload record {}: field {} {}", id, key, reason)]
    InvalidRecord {
        id: String,
        key: &'static str,
        reason: String,
    },

    #[error("Failed to read upload data for {}: {}", id, source)]
    Read {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Blob {
        #[from]
        source: BlobError,
    },
}

impl UploadStoreError {
    /// True when the backing store reported the record as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Blob { source } if source.is_not_found())
    }
}
