//! Error types for append-blob operations.

use std::fmt;

/// Result type for append-blob operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur while talking to the backing blob store.
#[derive(Debug)]
pub enum BlobError {
    /// Blob not found at the specified location.
    NotFound { path: String },

    /// A block's precomputed checksum did not match its contents.
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The blob id can't be mapped to a storage location.
    InvalidId { id: String },

    /// Invalid URL format or scheme.
    InvalidUrl { url: String, reason: String },

    /// Stored properties or tags could not be decoded.
    Corrupted { path: String, reason: String },

    /// Network or backend error (S3/Azure/local).
    NetworkError { source: anyhow::Error },

    /// Backend not supported.
    UnsupportedBackend { scheme: String },

    /// Generic error.
    Other { source: anyhow::Error },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::NotFound { path } => write!(f, "Blob not found: {}", path),
            BlobError::ChecksumMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "Checksum mismatch for block of {}: expected {}, computed {}",
                path, expected, actual
            ),
            BlobError::InvalidId { id } => write!(f, "Invalid blob id: {:?}", id),
            BlobError::InvalidUrl { url, reason } => {
                write!(f, "Invalid URL '{}': {}", url, reason)
            }
            BlobError::Corrupted { path, reason } => {
                write!(f, "Corrupted blob properties at {}: {}", path, reason)
            }
            BlobError::NetworkError { source } => write!(f, "Network error: {}", source),
            BlobError::UnsupportedBackend { scheme } => {
                write!(f, "Unsupported backend: {}", scheme)
            }
            BlobError::Other { source } => write!(f, "Blob store error: {}", source),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobError::NetworkError { source } => Some(source.as_ref()),
            BlobError::Other { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for BlobError {
    fn from(err: anyhow::Error) -> Self {
        BlobError::Other { source: err }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { path },
            _ => BlobError::NetworkError {
                source: anyhow::Error::from(err),
            },
        }
    }
}

impl From<url::ParseError> for BlobError {
    fn from(err: url::ParseError) -> Self {
        BlobError::InvalidUrl {
            url: String::new(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BlobError {
    fn from(err: serde_json::Error) -> Self {
        BlobError::Corrupted {
            path: String::new(),
            reason: err.to_string(),
        }
    }
}
