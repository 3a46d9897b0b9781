//! Media normalization core.
//!
//! Converts arbitrary audio to messaging-grade Opus-in-Ogg and images
//! to bounded progressive JPEG, and offloads payloads to S3-compatible
//! object storage through a capability-based provider abstraction.
//! Everything runs over in-memory pipelines with bounded concurrency
//! and per-request deadlines; HTTP framing and configuration loading
//! live outside this crate.

pub mod config;
pub mod context;
pub mod converter;
pub mod downloader;
pub mod encoding;
pub mod metrics;
pub mod pool;
pub mod provider;
pub mod service;
pub mod storage;
pub mod testing;
pub mod upload;

pub use config::{CoreConfig, PoolConfig};
pub use context::{ContextError, OpContext};
pub use converter::{
    AudioConverter, AudioRequest, AudioResponse, ConverterConfig, ConverterError, ImageConverter,
    ImageEngine, ImageRequest, ImageResponse,
};
pub use downloader::{DownloadError, Downloader, DownloaderConfig};
pub use pool::{BufferPool, PoolError, WorkerPool};
pub use provider::{
    ObjectTransport, ProviderError, ProviderFactory, ProviderKind, S3Config, S3Provider,
    UploadBody, UploadOptions, UploadResult,
};
pub use service::{ConversionService, ServiceError, MAX_BATCH_SIZE};
pub use storage::{S3Service, StorageConfig, StorageError};
pub use upload::{UploadError, UploadInfo, UploadManager, UploadManagerConfig, UploadStatus};
