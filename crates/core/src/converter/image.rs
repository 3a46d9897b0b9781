//! Image conversion to a size-bounded progressive JPEG.
//!
//! vips is the primary engine; ffmpeg covers resizing and acts as the
//! transparent fallback whenever vips is unavailable or fails.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::config::{ConverterConfig, ImageEngine};
use super::error::ConverterError;
use super::exec::{pipe_through, tool_available};
use super::probe;
use super::resolve_input;
use super::types::{ImageConverterStats, ImageRequest, ImageResponse};
use crate::context::OpContext;
use crate::downloader::Downloader;
use crate::encoding::to_data_url;
use crate::metrics;

const IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    Vips,
    Ffmpeg,
}

/// Effective request parameters after defaulting and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImageParams {
    pub quality: u32,
    pub max_width: u32,
    pub max_height: u32,
}

/// Converts arbitrary image payloads to progressive JPEG within a
/// bounding box.
pub struct ImageConverter {
    config: ConverterConfig,
    downloader: Arc<Downloader>,
    use_vips: bool,
    stats: Mutex<ImageConverterStats>,
}

impl ImageConverter {
    pub fn new(config: ConverterConfig, downloader: Arc<Downloader>) -> Self {
        let use_vips = match config.image_engine {
            ImageEngine::Auto => tool_available(&config.vips_path),
            ImageEngine::Vips => true,
            ImageEngine::Ffmpeg => false,
        };

        Self {
            config,
            downloader,
            use_vips,
            stats: Mutex::new(ImageConverterStats::default()),
        }
    }

    /// Whether the primary engine is in play.
    pub fn is_vips_available(&self) -> bool {
        self.use_vips
    }

    pub(crate) fn effective_params(&self, request: &ImageRequest) -> ImageParams {
        let quality = if request.quality == 0 || request.quality > 100 {
            self.config.default_quality
        } else {
            request.quality
        };
        let max_width = if request.max_width == 0 {
            self.config.default_max_width
        } else {
            request.max_width
        };
        let max_height = if request.max_height == 0 {
            self.config.default_max_height
        } else {
            request.max_height
        };

        ImageParams {
            quality,
            max_width,
            max_height,
        }
    }

    /// Convert one payload. Counters record which engine produced each
    /// success.
    pub async fn convert(
        &self,
        ctx: &OpContext,
        request: &ImageRequest,
    ) -> Result<ImageResponse, ConverterError> {
        let start = Instant::now();
        let result = self.perform(ctx, request).await;

        match &result {
            Ok((_, engine)) => {
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&["image", "success"])
                    .inc();
                metrics::CONVERSION_DURATION
                    .with_label_values(&["image"])
                    .observe(start.elapsed().as_secs_f64());
                let mut stats = self.stats.lock().expect("image stats poisoned");
                match engine {
                    Engine::Vips => stats.record_vips_success(start.elapsed()),
                    Engine::Ffmpeg => stats.record_ffmpeg_success(start.elapsed()),
                }
            }
            Err(err) => {
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&["image", "failed"])
                    .inc();
                debug!(%err, "image conversion failed");
                self.stats
                    .lock()
                    .expect("image stats poisoned")
                    .record_failure();
            }
        }

        result.map(|(response, _)| response)
    }

    async fn perform(
        &self,
        ctx: &OpContext,
        request: &ImageRequest,
    ) -> Result<(ImageResponse, Engine), ConverterError> {
        let params = self.effective_params(request);
        let input = resolve_input(&self.downloader, ctx, &request.data, request.is_url).await?;

        if input.is_empty() {
            return Err(ConverterError::EmptyInput);
        }
        if input.len() as u64 > self.config.max_image_size {
            return Err(ConverterError::InputTooLarge {
                size: input.len() as u64,
                max: self.config.max_image_size,
            });
        }

        let (output, engine) = self.encode(ctx, &input, params).await?;

        let (width, height) = probe::image_dimensions(
            ctx,
            &self.config.ffprobe_path,
            Duration::from_secs(self.config.probe_timeout_secs),
            &output,
        )
        .await;

        let response = ImageResponse {
            data: to_data_url(IMAGE_MIME, &output),
            width,
            height,
            size: output.len(),
        };
        Ok((response, engine))
    }

    async fn encode(
        &self,
        ctx: &OpContext,
        input: &[u8],
        params: ImageParams,
    ) -> Result<(Vec<u8>, Engine), ConverterError> {
        if self.use_vips {
            // vips encodes without resizing, so it only serves inputs
            // that already fit the bounding box; anything larger (or of
            // unknown size) goes through the resizing transcoder.
            let (width, height) = probe::image_dimensions(
                ctx,
                &self.config.ffprobe_path,
                Duration::from_secs(self.config.probe_timeout_secs),
                input,
            )
            .await;

            let fits = width > 0
                && height > 0
                && width <= params.max_width
                && height <= params.max_height;

            if fits {
                match self.encode_with_vips(ctx, input, params.quality).await {
                    Ok(output) => return Ok((output, Engine::Vips)),
                    Err(err) => {
                        warn!(%err, "vips failed, falling back to ffmpeg");
                    }
                }
            }
        }

        let output = self.encode_with_ffmpeg(ctx, input, params).await?;
        Ok((output, Engine::Ffmpeg))
    }

    async fn encode_with_vips(
        &self,
        ctx: &OpContext,
        input: &[u8],
        quality: u32,
    ) -> Result<Vec<u8>, ConverterError> {
        let args = vips_args(quality);
        pipe_through(ctx, "vips", &self.config.vips_path, &args, input).await
    }

    async fn encode_with_ffmpeg(
        &self,
        ctx: &OpContext,
        input: &[u8],
        params: ImageParams,
    ) -> Result<Vec<u8>, ConverterError> {
        let args = ffmpeg_image_args(params);
        pipe_through(ctx, "ffmpeg", &self.config.ffmpeg_path, &args, input).await
    }

    /// Convert several payloads in parallel with a per-item deadline.
    /// Results preserve input order.
    pub async fn convert_batch(
        &self,
        ctx: &OpContext,
        requests: &[ImageRequest],
    ) -> Vec<Result<ImageResponse, ConverterError>> {
        let item_timeout = Duration::from_secs(self.config.batch_item_timeout_secs);
        let futures = requests.iter().map(|request| {
            let item_ctx = ctx.child_with_timeout(item_timeout);
            async move { self.convert(&item_ctx, request).await }
        });
        futures::future::join_all(futures).await
    }

    /// Check that `data` is a payload the tooling can open.
    pub async fn validate_input(&self, ctx: &OpContext, data: &[u8]) -> Result<(), ConverterError> {
        probe::validate_media(ctx, &self.config.ffprobe_path, data).await
    }

    /// Snapshot of the conversion counters.
    pub fn stats(&self) -> ImageConverterStats {
        self.stats.lock().expect("image stats poisoned").clone()
    }
}

fn vips_args(quality: u32) -> Vec<String> {
    vec![
        "jpegsave_buffer".to_string(),
        "-".to_string(),
        "-".to_string(),
        format!("--Q={quality}"),
        "--optimize-coding".to_string(),
        "--strip".to_string(),
        "--interlace".to_string(),
        "--trellis-quant".to_string(),
        "--overshoot-deringing".to_string(),
        "--optimize-scans".to_string(),
        "--quant-table=3".to_string(),
    ]
}

/// Map the 1..=100 request quality onto ffmpeg's 2..=31 scale, where
/// lower means higher quality.
fn ffmpeg_quality(quality: u32) -> u32 {
    (31u32.saturating_sub(quality * 29 / 100)).clamp(2, 31)
}

fn ffmpeg_image_args(params: ImageParams) -> Vec<String> {
    let scale = format!(
        "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease:flags=lanczos",
        params.max_width, params.max_height
    );

    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-vf".to_string(),
        scale,
        "-q:v".to_string(),
        ffmpeg_quality(params.quality).to_string(),
        "-vcodec".to_string(),
        "mjpeg".to_string(),
        "-pix_fmt".to_string(),
        "yuvj444p".to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-threads".to_string(),
        "0".to_string(),
        "pipe:1".to_string(),
    ]
}
