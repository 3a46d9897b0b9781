//! HTTP downloader for remote media payloads.
//!
//! A single reusable client with pooled connections; media is already
//! compressed, so response decompression stays off.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::context::{ContextError, OpContext};
use crate::metrics;
use crate::pool::BufferPool;

const USER_AGENT: &str = "convertino/0.3";

/// Errors produced by the downloader.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Building or executing the request failed.
    #[error("http request: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-200 status.
    #[error("http status {0}")]
    Status(u16),

    /// The advertised Content-Length exceeds the configured maximum.
    #[error("content too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    /// The body turned out to be larger than the configured maximum.
    #[error("content exceeds maximum size of {max} bytes")]
    ExceedsMax { max: u64 },

    /// A streaming chunk sink rejected a chunk.
    #[error("process chunk: {0}")]
    Sink(String),

    /// The operation context was cancelled or timed out.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Downloader tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Hard cap on downloaded payload size in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Base per-operation deadline, applied when the caller's context
    /// carries none.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Idle connections kept per host.
    #[serde(default = "default_pool_size")]
    pub max_idle_per_host: usize,

    /// Idle connection lifetime in seconds.
    #[serde(default = "default_idle_secs")]
    pub idle_timeout_secs: u64,

    /// TCP/TLS connect timeout in seconds.
    #[serde(default = "default_connect_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_size() -> u64 {
    500 * 1024 * 1024
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_pool_size() -> usize {
    100
}

fn default_idle_secs() -> u64 {
    90
}

fn default_connect_secs() -> u64 {
    10
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            timeout_secs: default_timeout_secs(),
            max_idle_per_host: default_pool_size(),
            idle_timeout_secs: default_idle_secs(),
            connect_timeout_secs: default_connect_secs(),
        }
    }
}

/// Download performance counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloaderStats {
    pub total_downloads: u64,
    pub failed_downloads: u64,
    pub total_bytes: u64,
    /// Rolling average download time, `(old*9 + sample)/10`.
    pub avg_download_time: Duration,
}

/// HTTP downloader with connection reuse, a size cap and per-call
/// deadlines.
pub struct Downloader {
    client: Client,
    buffer_pool: Arc<BufferPool>,
    config: DownloaderConfig,
    stats: Mutex<DownloaderStats>,
}

impl Downloader {
    /// Build a downloader over a fresh pooled client.
    pub fn new(config: DownloaderConfig, buffer_pool: Arc<BufferPool>) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.connect_timeout_secs))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            buffer_pool,
            config,
            stats: Mutex::new(DownloaderStats::default()),
        }
    }

    /// The caller context, or a child bounded by the base deadline when
    /// the caller did not supply one.
    fn effective_context(&self, ctx: &OpContext) -> OpContext {
        if ctx.deadline().is_some() {
            ctx.clone()
        } else {
            ctx.child_with_timeout(Duration::from_secs(self.config.timeout_secs))
        }
    }

    /// Fetch `url` entirely into memory.
    pub async fn download(&self, ctx: &OpContext, url: &str) -> Result<Vec<u8>, DownloadError> {
        let start = Instant::now();
        let ctx = self.effective_context(ctx);

        let result = ctx.run(self.fetch(url)).await;
        match result {
            Ok(Ok(data)) => {
                self.record_success(data.len() as u64, start.elapsed());
                Ok(data)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(err)
            }
            Err(ctx_err) => {
                self.record_failure();
                Err(ctx_err.into())
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut response = self
            .client
            .get(url)
            .header("Accept", "*/*")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        let max = self.config.max_size;
        if let Some(length) = response.content_length() {
            if length > max {
                return Err(DownloadError::TooLarge { size: length, max });
            }
        }

        let mut buf = self.buffer_pool.get();
        let outcome = Self::read_limited(&mut response, &mut buf, max).await;
        let result = match outcome {
            Ok(()) => Ok(buf.as_slice().to_vec()),
            Err(err) => Err(err),
        };
        self.buffer_pool.put(buf);
        result
    }

    /// Read the body into `buf`, failing once more than `max` bytes show
    /// up. Hitting the cap exactly triggers a one-extra-chunk probe so a
    /// truncated read is reported rather than silently returned.
    async fn read_limited(
        response: &mut reqwest::Response,
        buf: &mut Vec<u8>,
        max: u64,
    ) -> Result<(), DownloadError> {
        while let Some(chunk) = response.chunk().await? {
            if buf.len() as u64 + chunk.len() as u64 > max {
                return Err(DownloadError::ExceedsMax { max });
            }
            buf.extend_from_slice(&chunk);
        }

        if buf.len() as u64 == max {
            if let Some(extra) = response.chunk().await? {
                if !extra.is_empty() {
                    return Err(DownloadError::ExceedsMax { max });
                }
            }
        }

        Ok(())
    }

    /// Fetch `url`, handing each chunk to `sink` instead of buffering the
    /// whole payload.
    pub async fn stream<F>(
        &self,
        ctx: &OpContext,
        url: &str,
        mut sink: F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(&[u8]) -> Result<(), String> + Send,
    {
        let start = Instant::now();
        let ctx = self.effective_context(ctx);

        let outcome: Result<Result<u64, DownloadError>, ContextError> = ctx
            .run(async {
                let mut response = self
                    .client
                    .get(url)
                    .header("Accept", "*/*")
                    .send()
                    .await?;

                if response.status() != StatusCode::OK {
                    return Err(DownloadError::Status(response.status().as_u16()));
                }

                let max = self.config.max_size;
                let mut total: u64 = 0;
                while let Some(chunk) = response.chunk().await? {
                    if total + chunk.len() as u64 > max {
                        return Err(DownloadError::ExceedsMax { max });
                    }
                    total += chunk.len() as u64;
                    sink(&chunk).map_err(DownloadError::Sink)?;
                }
                Ok(total)
            })
            .await;

        match outcome {
            Ok(Ok(total)) => {
                self.record_success(total, start.elapsed());
                Ok(total)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(err)
            }
            Err(ctx_err) => {
                self.record_failure();
                Err(ctx_err.into())
            }
        }
    }

    /// Probe `url` with a HEAD request without downloading the body.
    pub async fn validate(&self, ctx: &OpContext, url: &str) -> Result<(), DownloadError> {
        let ctx = self.effective_context(ctx);
        ctx.run(async {
            let response = self.client.head(url).send().await?;
            if response.status() != StatusCode::OK {
                return Err(DownloadError::Status(response.status().as_u16()));
            }
            if let Some(length) = response.content_length() {
                if length > self.config.max_size {
                    return Err(DownloadError::TooLarge {
                        size: length,
                        max: self.config.max_size,
                    });
                }
            }
            Ok(())
        })
        .await?
    }

    /// Fetch just the Content-Type of `url`.
    pub async fn content_type(
        &self,
        ctx: &OpContext,
        url: &str,
    ) -> Result<Option<String>, DownloadError> {
        let ctx = self.effective_context(ctx);
        ctx.run(async {
            let response = self.client.head(url).send().await?;
            if response.status() != StatusCode::OK {
                return Err(DownloadError::Status(response.status().as_u16()));
            }
            Ok(response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned))
        })
        .await?
    }

    fn record_success(&self, bytes: u64, elapsed: Duration) {
        metrics::DOWNLOADS_TOTAL.with_label_values(&["success"]).inc();
        metrics::DOWNLOAD_BYTES.inc_by(bytes);
        debug!(bytes, ?elapsed, "download complete");

        let mut stats = self.stats.lock().expect("downloader stats poisoned");
        stats.total_downloads += 1;
        stats.total_bytes += bytes;
        stats.avg_download_time = if stats.avg_download_time.is_zero() {
            elapsed
        } else {
            (stats.avg_download_time * 9 + elapsed) / 10
        };
    }

    fn record_failure(&self) {
        metrics::DOWNLOADS_TOTAL.with_label_values(&["failed"]).inc();

        let mut stats = self.stats.lock().expect("downloader stats poisoned");
        stats.total_downloads += 1;
        stats.failed_downloads += 1;
    }

    /// Snapshot of the current download counters.
    pub fn stats(&self) -> DownloaderStats {
        self.stats.lock().expect("downloader stats poisoned").clone()
    }

    /// Maximum payload size accepted by this downloader.
    pub fn max_size(&self) -> u64 {
        self.config.max_size
    }
}
