//! Upload records and their persisted metadata representation.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{Result, UploadStoreError};

pub const UPLOAD_LENGTH_KEY: &str = "UploadLength";
pub const RAW_METADATA_KEY: &str = "RawMetadata";
pub const UPLOAD_OFFSET_KEY: &str = "UploadOffset";
pub const CHECKSUM_KEY: &str = "MD5Checksum";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub id: String,
    pub upload_length: u64,
    pub offset: u64,
    pub raw_metadata: String,
    /// Digest of the last block flushed by the most recent append.
    pub last_block_checksum: Option<Vec<u8>>,
}

impl UploadRecord {
    pub fn new(id: impl Into<String>, upload_length: u64, raw_metadata: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            upload_length,
            offset: 0,
            raw_metadata: raw_metadata.into(),
            last_block_checksum: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.offset == self.upload_length
    }

    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::from([
            (UPLOAD_LENGTH_KEY.to_string(), self.upload_length.to_string()),
            (RAW_METADATA_KEY.to_string(), self.raw_metadata.clone()),
            (UPLOAD_OFFSET_KEY.to_string(), self.offset.to_string()),
        ]);
        if let Some(checksum) = &self.last_block_checksum {
            metadata.insert(CHECKSUM_KEY.to_string(), STANDARD.encode(checksum));
        }
        metadata
    }

    pub fn from_metadata(id: &str, metadata: &HashMap<String, String>) -> Result<Self> {
        let upload_length = parse_u64(id, metadata, UPLOAD_LENGTH_KEY)?;
        let offset = parse_u64(id, metadata, UPLOAD_OFFSET_KEY)?;
        if offset > upload_length {
            return Err(invalid(
                id,
                UPLOAD_OFFSET_KEY,
                format!("{} exceeds upload length {}", offset, upload_length),
            ));
        }
        let raw_metadata = metadata
            .get(RAW_METADATA_KEY)
            .cloned()
            .unwrap_or_default();
        let last_block_checksum = match metadata.get(CHECKSUM_KEY) {
            Some(encoded) if !encoded.is_empty() => Some(
                STANDARD
                    .decode(encoded)
                    .map_err(|e| invalid(id, CHECKSUM_KEY, e.to_string()))?,
            ),
            _ => None,
        };

        Ok(Self {
            id: id.to_string(),
            upload_length,
            offset,
            raw_metadata,
            last_block_checksum,
        })
    }
}

fn parse_u64(id: &str, metadata: &HashMap<String, String>, key: &'static str) -> Result<u64> {
    let value = metadata
        .get(key)
        .ok_or_else(|| invalid(id, key, "is missing".to_string()))?;
    value
        .parse()
        .map_err(|e| invalid(id, key, format!("{:?} is not a byte count: {}", value, e)))
}

fn invalid(id: &str, key: &'static str, reason: String) -> UploadStoreError {
    UploadStoreError::InvalidRecord {
        id: id.to_string(),
        key,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip_keeps_checksum() {
        let mut record = UploadRecord::new("abc", 10, "filename ZmlsZQ==");
        record.offset = 4;
        record.last_block_checksum = Some(vec![1, 2, 3]);

        let metadata = record.to_metadata();
        assert_eq!(metadata[UPLOAD_LENGTH_KEY], "10");
        assert_eq!(metadata[UPLOAD_OFFSET_KEY], "4");
        assert_eq!(metadata[CHECKSUM_KEY], "AQID");

        assert_eq!(UploadRecord::from_metadata("abc", &metadata).unwrap(), record);
    }

    #[test]
    fn test_missing_length_is_invalid() {
        let metadata = HashMap::from([(UPLOAD_OFFSET_KEY.to_string(), "0".to_string())]);
        let err = UploadRecord::from_metadata("abc", &metadata).unwrap_err();
        assert!(matches!(
            err,
            UploadStoreError::InvalidRecord { key: UPLOAD_LENGTH_KEY, .. }
        ));
    }

    #[test]
    fn test_offset_past_length_is_invalid() {
        let metadata = HashMap::from([
            (UPLOAD_LENGTH_KEY.to_string(), "5".to_string()),
            (UPLOAD_OFFSET_KEY.to_string(), "6".to_string()),
        ]);
        assert!(UploadRecord::from_metadata("abc", &metadata).is_err());
    }

    #[test]
    fn test_new_record_is_empty() {
        let record = UploadRecord::new("abc", 0, "");
        assert!(record.is_complete());
        assert!(!record.to_metadata().contains_key(CHECKSUM_KEY));
    }
}
