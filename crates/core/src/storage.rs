//! Storage service: upload policy and provider lifecycle on top of one
//! [`S3Provider`].

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::OpContext;
use crate::provider::{
    ProviderError, ProviderFactory, S3Config, S3Provider, UploadBody, UploadOptions, UploadResult,
};

/// Policy configuration layered over the provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Master switch; a disabled service refuses storage operations.
    #[serde(default)]
    pub enabled: bool,

    /// Provider connection settings.
    pub s3: S3Config,

    /// Key prefix; a trailing slash is stripped during key generation.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Include a `YYYY/MM/DD` date path in generated keys.
    #[serde(default = "default_true")]
    pub date_in_key: bool,

    /// Include a unique token in generated keys.
    #[serde(default = "default_true")]
    pub unique_in_key: bool,

    /// Keep the caller-supplied filename in generated keys.
    #[serde(default = "default_true")]
    pub preserve_filename: bool,

    /// Allowed content types; `type/*` wildcards are supported and an
    /// empty list allows everything.
    #[serde(default)]
    pub allowed_content_types: Vec<String>,

    /// Maximum upload size in bytes; 0 means no limit.
    #[serde(default)]
    pub max_file_size: u64,

    /// Record service statistics.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Log individual uploads.
    #[serde(default = "default_true")]
    pub log_uploads: bool,
}

fn default_key_prefix() -> String {
    "uploads/".to_string()
}

fn default_true() -> bool {
    true
}

impl StorageConfig {
    pub fn new(s3: S3Config) -> Self {
        Self {
            enabled: true,
            s3,
            key_prefix: default_key_prefix(),
            date_in_key: true,
            unique_in_key: true,
            preserve_filename: true,
            allowed_content_types: Vec::new(),
            max_file_size: 0,
            enable_metrics: true,
            log_uploads: true,
        }
    }

    /// Whether `content_type` passes the allowlist.
    pub fn is_content_type_allowed(&self, content_type: &str) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }

        self.allowed_content_types.iter().any(|allowed| {
            if allowed.eq_ignore_ascii_case(content_type) {
                return true;
            }
            if let Some(prefix) = allowed.strip_suffix("/*") {
                let wanted = format!("{}/", prefix.to_ascii_lowercase());
                return content_type.to_ascii_lowercase().starts_with(&wanted);
            }
            false
        })
    }

    /// Whether `size` passes the size cap.
    pub fn is_file_size_allowed(&self, size: u64) -> bool {
        self.max_file_size == 0 || size <= self.max_file_size
    }
}

/// Errors produced by the storage service.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("S3 service is disabled")]
    Disabled,

    #[error("S3 provider not initialized")]
    NotInitialized,

    #[error("content type not allowed: {0}")]
    ContentTypeNotAllowed(String),

    #[error("file size exceeds maximum allowed: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Service statistics with derived views.
#[derive(Debug, Clone, Default, Serialize)]
pub struct S3ServiceStats {
    pub total_uploads: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    pub total_bytes: u64,
    /// Rolling average, `(old*9 + sample)/10`, seeded on first sample.
    pub average_upload_time: Duration,
    pub last_upload: Option<DateTime<Utc>>,
}

impl S3ServiceStats {
    /// Upload success rate as a percentage; 100 when nothing ran yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_uploads == 0 {
            return 100.0;
        }
        self.successful_uploads as f64 / self.total_uploads as f64 * 100.0
    }

    /// Human-readable average upload time.
    pub fn formatted_average(&self) -> String {
        if self.average_upload_time.is_zero() {
            "N/A".to_string()
        } else {
            format!("{:?}", self.average_upload_time)
        }
    }
}

/// Policy wrapper owning the active provider; reloads swap it
/// atomically.
pub struct S3Service {
    provider: RwLock<Option<Arc<dyn S3Provider>>>,
    config: RwLock<StorageConfig>,
    factory: ProviderFactory,
    stats: Mutex<S3ServiceStats>,
    /// Serializes reloads; the provider slot itself is read-mostly.
    reload_guard: tokio::sync::Mutex<()>,
}

impl S3Service {
    /// Build the service, constructing and health-checking the provider
    /// when enabled.
    pub async fn new(config: StorageConfig, factory: ProviderFactory) -> Result<Self, StorageError> {
        let provider = if config.enabled {
            let provider = Self::build_provider(&factory, &config).await?;
            info!(provider = provider.name(), bucket = %config.s3.bucket, "storage service initialized");
            Some(provider)
        } else {
            info!("storage service disabled");
            None
        };

        Ok(Self {
            provider: RwLock::new(provider),
            config: RwLock::new(config),
            factory,
            stats: Mutex::new(S3ServiceStats::default()),
            reload_guard: tokio::sync::Mutex::new(()),
        })
    }

    async fn build_provider(
        factory: &ProviderFactory,
        config: &StorageConfig,
    ) -> Result<Arc<dyn S3Provider>, StorageError> {
        let provider = factory.create(&config.s3)?;
        let health_ctx = OpContext::with_timeout(Duration::from_secs(30));
        provider.health_check(&health_ctx).await?;
        Ok(provider)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().expect("storage config poisoned").enabled
    }

    /// The active provider, or the disabled/uninitialized error.
    pub fn provider(&self) -> Result<Arc<dyn S3Provider>, StorageError> {
        if !self.is_enabled() {
            return Err(StorageError::Disabled);
        }
        self.provider
            .read()
            .expect("storage provider poisoned")
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    /// Current policy configuration snapshot.
    pub fn config(&self) -> StorageConfig {
        self.config.read().expect("storage config poisoned").clone()
    }

    /// Check allowlist and size policy for an upload.
    pub(crate) fn check_policy(&self, content_type: &str, size: u64) -> Result<(), StorageError> {
        let config = self.config.read().expect("storage config poisoned");
        if !config.is_content_type_allowed(content_type) {
            return Err(StorageError::ContentTypeNotAllowed(content_type.to_string()));
        }
        if !config.is_file_size_allowed(size) {
            return Err(StorageError::FileTooLarge {
                size,
                max: config.max_file_size,
            });
        }
        Ok(())
    }

    /// Layer configured defaults onto zero-valued options.
    pub(crate) fn apply_default_options(&self, opts: &mut UploadOptions) {
        let config = self.config.read().expect("storage config poisoned");
        if opts.expiration_days == 0 {
            opts.expiration_days = config.s3.default_expiration_days;
        }
        if !opts.public && config.s3.public_read {
            opts.public = true;
        }
    }

    /// Upload an in-memory payload under the service policy.
    pub async fn upload(
        &self,
        ctx: &OpContext,
        key: &str,
        data: Vec<u8>,
        mut opts: UploadOptions,
    ) -> Result<UploadResult, StorageError> {
        let provider = self.provider()?;
        let start = Instant::now();

        self.check_policy(&opts.content_type, data.len() as u64)?;
        self.apply_default_options(&mut opts);

        let size = data.len() as u64;
        let result = provider
            .upload(ctx, key, UploadBody::from_bytes(data), size, opts)
            .await;

        match &result {
            Ok(result) => {
                self.record_upload(start, result.size, true);
                if self.config().log_uploads {
                    info!(key = %result.key, size = result.size, "upload complete");
                }
            }
            Err(err) => {
                self.record_upload(start, 0, false);
                if self.config().log_uploads {
                    warn!(key, %err, "upload failed");
                }
            }
        }

        Ok(result?)
    }

    /// Upload a base64 or data-URL payload under the service policy.
    pub async fn upload_base64(
        &self,
        ctx: &OpContext,
        key: &str,
        data: &str,
        mut opts: UploadOptions,
    ) -> Result<UploadResult, StorageError> {
        let provider = self.provider()?;
        let start = Instant::now();

        self.apply_default_options(&mut opts);

        let result = provider.upload_base64(ctx, key, data, opts).await;
        match &result {
            Ok(result) => {
                self.record_upload(start, result.size, true);
                if self.config().log_uploads {
                    info!(key = %result.key, size = result.size, "base64 upload complete");
                }
            }
            Err(err) => {
                self.record_upload(start, 0, false);
                if self.config().log_uploads {
                    warn!(key, %err, "base64 upload failed");
                }
            }
        }

        Ok(result?)
    }

    /// Generate an object key from the configured segments: prefix,
    /// date path, unique token and the (preserved or generated)
    /// filename. Empty segments are skipped.
    pub fn generate_key(&self, filename: &str) -> String {
        let config = self.config.read().expect("storage config poisoned");
        let mut parts: Vec<String> = Vec::new();

        let prefix = config.key_prefix.trim_end_matches('/');
        if !prefix.is_empty() {
            parts.push(prefix.to_string());
        }

        if config.date_in_key {
            parts.push(Utc::now().format("%Y/%m/%d").to_string());
        }

        if config.unique_in_key {
            parts.push(Uuid::new_v4().simple().to_string());
        }

        if config.preserve_filename && !filename.is_empty() {
            parts.push(filename.to_string());
        } else {
            let ext = filename
                .rfind('.')
                .map(|idx| &filename[idx..])
                .unwrap_or("");
            parts.push(format!("file_{}{}", Uuid::new_v4().simple(), ext));
        }

        parts.join("/")
    }

    /// Delete an object through the active provider.
    pub async fn delete_object(&self, ctx: &OpContext, key: &str) -> Result<(), StorageError> {
        let provider = self.provider()?;
        Ok(provider.delete_object(ctx, key).await?)
    }

    /// Fetch object metadata through the active provider.
    pub async fn object_info(
        &self,
        ctx: &OpContext,
        key: &str,
    ) -> Result<crate::provider::ObjectInfo, StorageError> {
        let provider = self.provider()?;
        Ok(provider.object_info(ctx, key).await?)
    }

    /// Health of the active provider. A disabled service is healthy.
    pub async fn health_check(&self, ctx: &OpContext) -> Result<(), StorageError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let provider = self.provider()?;
        Ok(provider.health_check(ctx).await?)
    }

    /// Swap in a new configuration. The replacement provider is built
    /// and health-checked first; on failure the existing provider stays
    /// active and the error is returned.
    pub async fn reload(&self, new_config: StorageConfig) -> Result<(), StorageError> {
        let _guard = self.reload_guard.lock().await;

        if new_config.enabled {
            let provider = Self::build_provider(&self.factory, &new_config).await?;
            info!(provider = provider.name(), "storage service reloaded");
            *self.provider.write().expect("storage provider poisoned") = Some(provider);
        } else {
            info!("storage service reloaded: disabled");
            *self.provider.write().expect("storage provider poisoned") = None;
        }

        *self.config.write().expect("storage config poisoned") = new_config;
        Ok(())
    }

    fn record_upload(&self, start: Instant, bytes: u64, success: bool) {
        if !self.config().enable_metrics {
            return;
        }

        let mut stats = self.stats.lock().expect("storage stats poisoned");
        stats.total_uploads += 1;
        stats.last_upload = Some(Utc::now());

        if success {
            stats.successful_uploads += 1;
            stats.total_bytes += bytes;
            let elapsed = start.elapsed();
            stats.average_upload_time = if stats.average_upload_time.is_zero() {
                elapsed
            } else {
                (stats.average_upload_time * 9 + elapsed) / 10
            };
        } else {
            stats.failed_uploads += 1;
        }
    }

    /// Snapshot of the service statistics.
    pub fn stats(&self) -> S3ServiceStats {
        self.stats.lock().expect("storage stats poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ObjectTransport, ProviderKind};
    use crate::testing::MockTransport;

    fn s3_config() -> S3Config {
        let mut config = S3Config::new(ProviderKind::Minio, "https://s3.example.com", "media");
        config.access_key = "ak".to_string();
        config.secret_key = "sk".to_string();
        config
    }

    fn factory_with(transport: Arc<MockTransport>) -> ProviderFactory {
        ProviderFactory::new(Arc::new(move |_config| {
            Ok(Arc::clone(&transport) as Arc<dyn ObjectTransport>)
        }))
    }

    async fn service() -> (S3Service, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let service = S3Service::new(
            StorageConfig::new(s3_config()),
            factory_with(Arc::clone(&transport)),
        )
        .await
        .unwrap();
        (service, transport)
    }

    #[test]
    fn allowlist_supports_wildcards_and_empty_means_all() {
        let mut config = StorageConfig::new(s3_config());
        assert!(config.is_content_type_allowed("video/mp4"));

        config.allowed_content_types = vec!["image/*".to_string(), "audio/ogg".to_string()];
        assert!(config.is_content_type_allowed("image/png"));
        assert!(config.is_content_type_allowed("IMAGE/JPEG"));
        assert!(config.is_content_type_allowed("audio/ogg"));
        assert!(!config.is_content_type_allowed("video/mp4"));
        assert!(!config.is_content_type_allowed("imagexpng"));
    }

    #[test]
    fn zero_max_size_means_unlimited() {
        let mut config = StorageConfig::new(s3_config());
        assert!(config.is_file_size_allowed(u64::MAX));

        config.max_file_size = 100;
        assert!(config.is_file_size_allowed(100));
        assert!(!config.is_file_size_allowed(101));
    }

    #[tokio::test]
    async fn disabled_service_refuses_uploads() {
        let mut config = StorageConfig::new(s3_config());
        config.enabled = false;
        let service = S3Service::new(config, factory_with(Arc::new(MockTransport::new())))
            .await
            .unwrap();

        let err = service
            .upload(&OpContext::new(), "k", vec![1], UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Disabled));

        // A disabled service still reports healthy.
        service.health_check(&OpContext::new()).await.unwrap();
    }

    #[tokio::test]
    async fn upload_applies_policy_and_records_stats() {
        let (service, transport) = service().await;

        let result = service
            .upload(
                &OpContext::new(),
                "a/b.bin",
                vec![0u8; 128],
                UploadOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.size, 128);
        assert!(transport.object("a/b.bin").is_some());

        let stats = service.stats();
        assert_eq!(stats.total_uploads, 1);
        assert_eq!(stats.successful_uploads, 1);
        assert_eq!(stats.total_bytes, 128);
        assert!(stats.last_upload.is_some());
        assert_eq!(stats.success_rate(), 100.0);
        assert_ne!(stats.formatted_average(), "N/A");
    }

    #[tokio::test]
    async fn disallowed_content_type_is_rejected() {
        let (service, _transport) = service().await;
        let mut config = service.config();
        config.allowed_content_types = vec!["image/*".to_string()];
        service.reload(config).await.unwrap();

        let err = service
            .upload(
                &OpContext::new(),
                "k",
                vec![1],
                UploadOptions::with_content_type("video/mp4"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ContentTypeNotAllowed(_)));

        let stats = service.stats();
        assert_eq!(stats.failed_uploads, 0);
        assert_eq!(stats.total_uploads, 0);
    }

    #[tokio::test]
    async fn expiration_and_public_defaults_are_layered() {
        let transport = Arc::new(MockTransport::new());
        let mut storage_config = StorageConfig::new(s3_config());
        storage_config.s3.default_expiration_days = 7;
        storage_config.s3.public_read = true;
        let service = S3Service::new(storage_config, factory_with(Arc::clone(&transport)))
            .await
            .unwrap();

        let mut opts = UploadOptions::default();
        opts.public = false;
        opts.expiration_days = 0;
        service.apply_default_options(&mut opts);
        assert!(opts.public);
        assert_eq!(opts.expiration_days, 7);

        // Caller-provided values win.
        let mut opts = UploadOptions::default();
        opts.expiration_days = 2;
        service.apply_default_options(&mut opts);
        assert_eq!(opts.expiration_days, 2);
    }

    #[tokio::test]
    async fn generated_keys_follow_the_segment_order() {
        let (service, _) = service().await;
        let key = service.generate_key("photo.jpg");

        let parts: Vec<&str> = key.split('/').collect();
        // uploads / YYYY / MM / DD / <token> / photo.jpg
        assert_eq!(parts[0], "uploads");
        assert_eq!(parts.len(), 6);
        assert_eq!(*parts.last().unwrap(), "photo.jpg");
        assert_eq!(parts[4].len(), 32);
    }

    #[tokio::test]
    async fn generated_keys_without_filename_keep_the_extension() {
        let (service, _) = service().await;
        let mut config = service.config();
        config.preserve_filename = false;
        config.date_in_key = false;
        config.unique_in_key = false;
        service.reload(config).await.unwrap();

        let key = service.generate_key("movie.mp4");
        assert!(key.starts_with("uploads/file_"));
        assert!(key.ends_with(".mp4"));

        let bare = service.generate_key("");
        assert!(bare.starts_with("uploads/file_"));
        assert!(!bare.contains(".."));
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_existing_provider() {
        let healthy = Arc::new(MockTransport::new());
        let unhealthy = Arc::new(MockTransport::new());
        unhealthy.set_bucket_exists(false);

        // First create() gets the healthy transport, the reload gets
        // the unhealthy one.
        let queue = Mutex::new(vec![Arc::clone(&unhealthy), Arc::clone(&healthy)]);
        let factory = ProviderFactory::new(Arc::new(move |_config| {
            let transport = queue.lock().unwrap().pop().unwrap();
            Ok(transport as Arc<dyn ObjectTransport>)
        }));

        let service = S3Service::new(StorageConfig::new(s3_config()), factory)
            .await
            .unwrap();

        let err = service.reload(service.config()).await;
        assert!(err.is_err());

        // The original provider stays active.
        service
            .upload(&OpContext::new(), "still/works", vec![1], UploadOptions::default())
            .await
            .unwrap();
        assert!(healthy.object("still/works").is_some());
    }

    #[tokio::test]
    async fn reload_to_disabled_clears_the_provider() {
        let (service, _) = service().await;
        let mut config = service.config();
        config.enabled = false;
        service.reload(config).await.unwrap();

        assert!(!service.is_enabled());
        assert!(matches!(service.provider(), Err(StorageError::Disabled)));
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let transport = Arc::new(MockTransport::new());
        let mut config = StorageConfig::new(s3_config());
        config.enable_metrics = false;
        let service = S3Service::new(config, factory_with(transport)).await.unwrap();

        service
            .upload(&OpContext::new(), "k", vec![1], UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(service.stats().total_uploads, 0);
    }
}
