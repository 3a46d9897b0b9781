//! Configuration, option and result types for storage providers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ProviderError;

/// The closed set of supported provider tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Minio,
    Backblaze,
    DigitalOcean,
    Cloudflare,
    Wasabi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Minio => "minio",
            Self::Backblaze => "backblaze",
            Self::DigitalOcean => "digitalocean",
            Self::Cloudflare => "cloudflare",
            Self::Wasabi => "wasabi",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider connection and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub provider: ProviderKind,

    #[serde(default)]
    pub endpoint: String,

    /// Override for generating public URLs.
    #[serde(default)]
    pub public_endpoint: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_true")]
    pub use_ssl: bool,

    /// Path-style URLs (`endpoint/bucket/key`) instead of
    /// virtual-host style (`bucket.endpoint/key`).
    #[serde(default)]
    pub path_style: bool,

    #[serde(default)]
    pub public_read: bool,

    /// 0 means no expiration.
    #[serde(default)]
    pub default_expiration_days: u32,

    /// Uploads at or above this size go multipart. Default 5 MiB.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Multipart part size. Default 10 MiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_uploads: usize,

    /// Per-attempt upload timeout in seconds. Default 1 hour.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,

    /// Retry attempts for transient failures. Default 3.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_true() -> bool {
    true
}

fn default_multipart_threshold() -> u64 {
    5 * 1024 * 1024
}

fn default_chunk_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_concurrent() -> usize {
    3
}

fn default_upload_timeout() -> u64 {
    3600
}

fn default_retry_count() -> u32 {
    3
}

impl S3Config {
    /// A minimal config for the given provider and bucket; remaining
    /// fields take their defaults.
    pub fn new(provider: ProviderKind, endpoint: &str, bucket: &str) -> Self {
        Self {
            provider,
            endpoint: endpoint.to_string(),
            public_endpoint: String::new(),
            region: String::new(),
            bucket: bucket.to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            use_ssl: true,
            path_style: false,
            public_read: false,
            default_expiration_days: 0,
            multipart_threshold: default_multipart_threshold(),
            chunk_size: default_chunk_size(),
            max_concurrent_uploads: default_max_concurrent(),
            upload_timeout_secs: default_upload_timeout(),
            retry_count: default_retry_count(),
        }
    }

    /// Validate required fields and re-apply defaults to zero-valued
    /// numeric settings.
    pub fn validate(&mut self) -> Result<(), ProviderError> {
        if self.endpoint.is_empty() {
            return Err(ProviderError::MissingEndpoint);
        }
        if self.bucket.is_empty() {
            return Err(ProviderError::MissingBucket);
        }
        if self.access_key.is_empty() {
            return Err(ProviderError::MissingAccessKey);
        }
        if self.secret_key.is_empty() {
            return Err(ProviderError::MissingSecretKey);
        }

        if self.multipart_threshold == 0 {
            self.multipart_threshold = default_multipart_threshold();
        }
        if self.chunk_size == 0 {
            self.chunk_size = default_chunk_size();
        }
        if self.max_concurrent_uploads == 0 {
            self.max_concurrent_uploads = default_max_concurrent();
        }
        if self.upload_timeout_secs == 0 {
            self.upload_timeout_secs = default_upload_timeout();
        }

        Ok(())
    }

    /// Compose the public URL for `key` from the public endpoint
    /// override or the endpoint plus bucket, honoring path style.
    pub fn public_url(&self, key: &str) -> String {
        if !self.public_endpoint.is_empty() {
            let base = self.public_endpoint.trim_end_matches('/');
            if self.path_style {
                return format!("{}/{}/{}", base, self.bucket, key);
            }
            return format!("{}/{}", base, key);
        }

        let endpoint = self.endpoint.trim_end_matches('/');
        if self.path_style {
            return format!("{}/{}/{}", endpoint, self.bucket, key);
        }

        let host = endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        format!("https://{}.{}/{}", self.bucket, host, key)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Progress callback: `(bytes_transferred, total_bytes)`. A zero total
/// means the total is unknown.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Options for a single upload operation.
#[derive(Clone)]
pub struct UploadOptions {
    /// MIME type of the object.
    pub content_type: String,

    /// User-defined metadata; keys are case-insensitive at the store.
    pub metadata: HashMap<String, String>,

    /// Publicly readable object.
    pub public: bool,

    /// Object expiration in days; 0 means no expiration.
    pub expiration_days: u32,

    /// Storage class (STANDARD, REDUCED_REDUNDANCY, ...).
    pub storage_class: String,

    /// Called as bytes are read from the source.
    pub progress: Option<ProgressFn>,

    /// Multipart part size override; 0 uses the provider configuration.
    pub chunk_size: u64,

    /// Parallel part cap for multipart uploads.
    pub max_concurrent_parts: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_string(),
            metadata: HashMap::new(),
            public: true,
            expiration_days: 0,
            storage_class: "STANDARD".to_string(),
            progress: None,
            chunk_size: 0,
            max_concurrent_parts: 3,
        }
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("content_type", &self.content_type)
            .field("metadata", &self.metadata)
            .field("public", &self.public)
            .field("expiration_days", &self.expiration_days)
            .field("storage_class", &self.storage_class)
            .field("progress", &self.progress.is_some())
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrent_parts", &self.max_concurrent_parts)
            .finish()
    }
}

impl UploadOptions {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Default::default()
        }
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub key: String,

    #[serde(rename = "url")]
    pub public_url: String,

    pub size: u64,

    pub etag: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub provider: String,

    /// Wall time the upload took.
    pub processing_time: Duration,
}

/// Metadata about a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub storage_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}
