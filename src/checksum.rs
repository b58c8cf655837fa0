//! Block digests used for transfer validation and client checksum checks.

use std::{fmt, str::FromStr};

use md5::{Digest, Md5};

use crate::error::{Result, UploadStoreError};

/// Algorithms a client may use to verify an appended block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
}

impl ChecksumAlgorithm {
    pub const SUPPORTED: &'static [ChecksumAlgorithm] = &[ChecksumAlgorithm::Md5];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
        }
    }

    pub fn digest(&self, block: &[u8]) -> Vec<u8> {
        match self {
            ChecksumAlgorithm::Md5 => Md5::digest(block).to_vec(),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = UploadStoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::SUPPORTED
            .iter()
            .find(|algorithm| algorithm.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| UploadStoreError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            })
    }
}

/// Identifiers of every supported algorithm, as advertised to clients.
pub fn supported_algorithms() -> Vec<&'static str> {
    ChecksumAlgorithm::SUPPORTED
        .iter()
        .map(ChecksumAlgorithm::as_str)
        .collect()
}

/// Digest `block` with the algorithm named `algorithm`.
pub fn compute_digest(algorithm: &str, block: &[u8]) -> Result<Vec<u8>> {
    Ok(algorithm.parse::<ChecksumAlgorithm>()?.digest(block))
}

pub(crate) fn md5_digest(block: &[u8]) -> [u8; 16] {
    Md5::digest(block).into()
}
