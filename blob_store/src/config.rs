//! Object store construction from a connection URL.

use anyhow::anyhow;
use object_store::{parse_url_opts, path::Path, ObjectStore, ObjectStoreScheme};
use tracing::info;
use url::Url;

use crate::{BlobError, BlobResult};

/// Build an object_store client and base path for `url_str`.
///
/// Supported schemes are whatever `object_store` understands (`file://`,
/// `memory://`, `s3://`, `az://`, ...). For cloud schemes, `AWS_*` or
/// `AZURE_*` environment variables are injected so explicit keys take
/// priority over instance credentials.
pub fn build_object_store(url_str: &str) -> BlobResult<(Box<dyn ObjectStore>, Path)> {
    let url = url_str.parse::<Url>().map_err(|e| BlobError::InvalidUrl {
        url: url_str.to_string(),
        reason: e.to_string(),
    })?;
    let (scheme, _) = ObjectStoreScheme::parse(&url).map_err(|e| BlobError::InvalidUrl {
        url: url_str.to_string(),
        reason: e.to_string(),
    })?;

    let env_prefix = match scheme {
        ObjectStoreScheme::AmazonS3 => Some("AWS_"),
        ObjectStoreScheme::MicrosoftAzure => Some("AZURE_"),
        ObjectStoreScheme::Local | ObjectStoreScheme::Memory => None,
        other => {
            return Err(BlobError::UnsupportedBackend {
                scheme: format!("{:?}", other),
            })
        }
    };

    let opts = env_prefix.map(env_options).unwrap_or_default();
    info!(url = %url_str, scheme = ?scheme, "building object store");
    let (store, path) = parse_url_opts(&url, opts).map_err(|e| BlobError::NetworkError {
        source: anyhow!("failed to create object store for {}: {}", url_str, e),
    })?;
    Ok((store, path))
}

fn env_options(prefix: &str) -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(os_key, os_value)| {
            if let (Some(key), Some(value)) = (os_key.to_str(), os_value.to_str()) {
                if key.starts_with(prefix) {
                    return Some((key.to_ascii_lowercase(), String::from(value)));
                }
            }
            None
        })
        .collect()
}
