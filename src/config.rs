use std::{fmt::Debug, time::Duration};

use anyhow::{anyhow, Result};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Size of one appended block, 4 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

fn default_container() -> String {
    "uploads".to_string()
}

fn default_max_delete_parallelism() -> usize {
    4
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_container_init_timeout_secs() -> u64 {
    60
}

fn default_reap_interval_secs() -> u64 {
    300
}

/// How a front end should interpret the raw upload metadata string.
///
/// The store never parses metadata itself, it only carries the selection to
/// [`UploadFile`](crate::UploadFile).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataParsingStrategy {
    /// Every key must carry a value.
    #[default]
    Original,
    /// Keys without values are accepted.
    AllowEmptyValues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UploadStoreConfig {
    /// Backing store URL, e.g. `file:///var/uploads`, `s3://bucket` or
    /// `az://account`.
    pub connection: String,
    #[serde(default = "default_container")]
    pub container: String,
    /// Optional prefix under which records are placed inside the container.
    #[serde(default)]
    pub blob_path: Option<String>,
    #[serde(default)]
    pub public_container: bool,
    #[serde(default = "default_max_delete_parallelism")]
    pub max_delete_parallelism: usize,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_container_init_timeout_secs")]
    pub container_init_timeout_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default)]
    pub metadata_parsing: MetadataParsingStrategy,
}

impl Default for UploadStoreConfig {
    fn default() -> Self {
        UploadStoreConfig {
            connection: "memory:///".to_string(),
            container: default_container(),
            blob_path: None,
            public_container: false,
            max_delete_parallelism: default_max_delete_parallelism(),
            block_size: default_block_size(),
            container_init_timeout_secs: default_container_init_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            metadata_parsing: MetadataParsingStrategy::default(),
        }
    }
}

impl UploadStoreConfig {
    pub fn from_path(path: &str) -> Result<UploadStoreConfig> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml(&config_str)
    }

    /// Parse `config_str`, with `UPLOAD_STORE_*` environment variables
    /// taking precedence over the YAML values.
    pub fn from_yaml(config_str: &str) -> Result<UploadStoreConfig> {
        Self::from_yaml_and_env(config_str, "UPLOAD_STORE_")
    }

    fn from_yaml_and_env(config_str: &str, env_prefix: &str) -> Result<UploadStoreConfig> {
        let config: UploadStoreConfig = Figment::new()
            .merge(Yaml::string(config_str))
            .merge(Env::prefixed(env_prefix))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn generate(path: &str) -> Result<()> {
        let config = UploadStoreConfig::default();
        let str = serde_yaml::to_string(&config)?;
        std::fs::write(path, str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.is_empty() {
            return Err(anyhow!("connection must not be empty"));
        }
        if self.container.is_empty() || self.container.contains('/') {
            return Err(anyhow!("invalid container name: {:?}", self.container));
        }
        if self.max_delete_parallelism == 0 {
            return Err(anyhow!("max_delete_parallelism must be greater than 0"));
        }
        if self.block_size == 0 {
            return Err(anyhow!("block_size must be greater than 0"));
        }
        if self.container_init_timeout_secs == 0 {
            return Err(anyhow!("container_init_timeout_secs must be greater than 0"));
        }
        Ok(())
    }

    pub fn container_init_timeout(&self) -> Duration {
        Duration::from_secs(self.container_init_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}
