//! The validated configuration record the core receives.
//!
//! Loading (env, files) happens outside the library; everything here is
//! serde-defaulted so a zero configuration is runnable.

use serde::{Deserialize, Serialize};

use crate::converter::ConverterConfig;
use crate::downloader::DownloaderConfig;
use crate::storage::StorageConfig;
use crate::upload::UploadManagerConfig;

/// Resource pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Worker pool size.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Buffer pool slot size in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Buffer pool retention target.
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,
}

fn default_max_workers() -> usize {
    4
}

fn default_buffer_size() -> usize {
    10 * 1024 * 1024
}

fn default_buffer_pool_size() -> usize {
    100
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            buffer_size: default_buffer_size(),
            buffer_pool_size: default_buffer_pool_size(),
        }
    }
}

/// Aggregate configuration for the conversion and upload cores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub pools: PoolConfig,

    #[serde(default)]
    pub downloader: DownloaderConfig,

    #[serde(default)]
    pub converter: ConverterConfig,

    /// Storage section; absent means uploads are disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub upload: UploadManagerConfig,

    /// Per-request conversion deadline in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pools: PoolConfig::default(),
            downloader: DownloaderConfig::default(),
            converter: ConverterConfig::default(),
            storage: None,
            upload: UploadManagerConfig::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}
