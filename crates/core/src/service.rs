//! Conversion façade: boundary validation and batch orchestration over
//! the two converters.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::context::OpContext;
use crate::converter::{
    collect_batch, AudioConverter, AudioConverterStats, AudioRequest, AudioResponse,
    ConverterError, ImageConverter, ImageConverterStats, ImageRequest, ImageResponse,
};
use crate::pool::{WorkerPool, WorkerPoolStats};

/// Batch size bounds: 1 to 10 items.
pub const MAX_BATCH_SIZE: usize = 10;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Errors surfaced at the conversion boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("empty batch")]
    EmptyBatch,

    #[error("batch too large: {size} items (max: {max})")]
    BatchTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Converter(#[from] ConverterError),
}

/// Thin orchestration layer: validates requests, applies deadlines and
/// dispatches to the converters.
pub struct ConversionService {
    audio: Arc<AudioConverter>,
    image: Arc<ImageConverter>,
    workers: Arc<WorkerPool>,
    request_timeout: Duration,
}

impl ConversionService {
    /// Build the façade. A zero `request_timeout` falls back to 5
    /// minutes.
    pub fn new(
        audio: Arc<AudioConverter>,
        image: Arc<ImageConverter>,
        workers: Arc<WorkerPool>,
        request_timeout: Duration,
    ) -> Self {
        let request_timeout = if request_timeout.is_zero() {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            request_timeout
        };

        Self {
            audio,
            image,
            workers,
            request_timeout,
        }
    }

    /// Convert a single audio payload under the request deadline.
    pub async fn convert_audio(
        &self,
        ctx: &OpContext,
        request: &AudioRequest,
    ) -> Result<AudioResponse, ServiceError> {
        let ctx = ctx.child_with_timeout(self.request_timeout);
        Ok(self.audio.convert(&ctx, request).await?)
    }

    /// Convert a single image payload under the request deadline.
    pub async fn convert_image(
        &self,
        ctx: &OpContext,
        request: &ImageRequest,
    ) -> Result<ImageResponse, ServiceError> {
        let ctx = ctx.child_with_timeout(self.request_timeout);
        Ok(self.image.convert(&ctx, request).await?)
    }

    /// Validate the batch size and derive the overall batch deadline
    /// from the caller's context: request timeout × item count.
    fn check_batch_bounds(&self, ctx: &OpContext, len: usize) -> Result<OpContext, ServiceError> {
        if len == 0 {
            return Err(ServiceError::EmptyBatch);
        }
        if len > MAX_BATCH_SIZE {
            return Err(ServiceError::BatchTooLarge {
                size: len,
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(ctx.child_with_timeout(self.request_timeout * len as u32))
    }

    /// Convert 1 to 10 audio payloads in parallel. The first per-item
    /// failure (in input order) surfaces as the batch error.
    pub async fn convert_audio_batch(
        &self,
        ctx: &OpContext,
        requests: Vec<AudioRequest>,
    ) -> Result<Vec<AudioResponse>, ServiceError> {
        let batch_ctx = self.check_batch_bounds(ctx, requests.len())?;
        debug!(items = requests.len(), "audio batch started");

        let results = self.audio.convert_batch(&batch_ctx, &requests).await;
        Ok(collect_batch(results)?)
    }

    /// Convert 1 to 10 image payloads in parallel. The first per-item
    /// failure (in input order) surfaces as the batch error.
    pub async fn convert_image_batch(
        &self,
        ctx: &OpContext,
        requests: Vec<ImageRequest>,
    ) -> Result<Vec<ImageResponse>, ServiceError> {
        let batch_ctx = self.check_batch_bounds(ctx, requests.len())?;
        debug!(items = requests.len(), "image batch started");

        let results = self.image.convert_batch(&batch_ctx, &requests).await;
        Ok(collect_batch(results)?)
    }

    /// Audio converter counters.
    pub fn audio_stats(&self) -> AudioConverterStats {
        self.audio.stats()
    }

    /// Image converter counters.
    pub fn image_stats(&self) -> ImageConverterStats {
        self.image.stats()
    }

    /// Worker pool counters.
    pub fn worker_stats(&self) -> WorkerPoolStats {
        self.workers.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::testutil::fake_tool;
    use crate::converter::{ConverterConfig, ImageEngine};
    use crate::downloader::{Downloader, DownloaderConfig};
    use crate::pool::BufferPool;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    fn service_with(config: ConverterConfig) -> ConversionService {
        let downloader = Arc::new(Downloader::new(
            DownloaderConfig::default(),
            Arc::new(BufferPool::default()),
        ));
        let audio = Arc::new(AudioConverter::new(config.clone(), Arc::clone(&downloader)));
        let image = Arc::new(ImageConverter::new(config, downloader));
        let workers = Arc::new(WorkerPool::new(4));
        workers.start().unwrap();
        ConversionService::new(audio, image, workers, Duration::from_secs(30))
    }

    fn fake_tools_config(dir: &std::path::Path) -> ConverterConfig {
        let mut config = ConverterConfig::default().with_image_engine(ImageEngine::Ffmpeg);
        config.ffmpeg_path = fake_tool(dir, "ffmpeg", "cat");
        config.ffprobe_path = dir.join("missing-ffprobe");
        config
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let service = service_with(ConverterConfig::default());
        let err = service
            .convert_audio_batch(&OpContext::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmptyBatch));
    }

    #[tokio::test]
    async fn batch_bounds_are_one_to_ten() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(fake_tools_config(dir.path()));

        let request = AudioRequest {
            data: STANDARD.encode(b"payload"),
            is_url: false,
            input_type: None,
        };

        // Ten items are accepted.
        let ten = service
            .convert_audio_batch(&OpContext::new(), vec![request.clone(); 10])
            .await
            .unwrap();
        assert_eq!(ten.len(), 10);

        // Eleven are not.
        let err = service
            .convert_audio_batch(&OpContext::new(), vec![request; 11])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BatchTooLarge { size: 11, .. }));
    }

    #[tokio::test]
    async fn batch_results_preserve_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(fake_tools_config(dir.path()));

        let requests: Vec<AudioRequest> = (0..5)
            .map(|i| AudioRequest {
                data: STANDARD.encode(format!("item-{i}-payload")),
                is_url: false,
                input_type: None,
            })
            .collect();

        let responses = service
            .convert_audio_batch(&OpContext::new(), requests)
            .await
            .unwrap();
        for (i, response) in responses.iter().enumerate() {
            assert_eq!(response.size, format!("item-{i}-payload").len());
        }
    }

    #[tokio::test]
    async fn batch_surfaces_the_first_failure_with_its_index() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(fake_tools_config(dir.path()));

        let good = AudioRequest {
            data: STANDARD.encode(b"ok"),
            is_url: false,
            input_type: None,
        };
        let bad = AudioRequest {
            data: String::new(),
            is_url: false,
            input_type: None,
        };

        let err = service
            .convert_audio_batch(&OpContext::new(), vec![good, bad])
            .await
            .unwrap_err();
        match err {
            ServiceError::Converter(ConverterError::BatchItem { index, .. }) => {
                assert_eq!(index, 1)
            }
            other => panic!("expected BatchItem, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_batch_converts_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(fake_tools_config(dir.path()));

        let requests: Vec<ImageRequest> = (0..3)
            .map(|_| ImageRequest {
                data: STANDARD.encode(b"\xff\xd8jpeg-bytes"),
                is_url: false,
                max_width: 0,
                max_height: 0,
                quality: 0,
            })
            .collect();

        let responses = service
            .convert_image_batch(&OpContext::new(), requests)
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert!(responses[0].data.starts_with("data:image/jpeg;base64,"));
        assert_eq!(service.image_stats().total_conversions, 3);
    }

    #[tokio::test]
    async fn batch_deadline_derives_from_the_caller_context() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(fake_tools_config(dir.path()));

        // An already-cancelled caller context propagates into the
        // batch instead of being replaced by a fresh one.
        let ctx = OpContext::new();
        ctx.cancel();

        let request = AudioRequest {
            data: STANDARD.encode(b"payload"),
            is_url: false,
            input_type: None,
        };
        let err = service
            .convert_audio_batch(&ctx, vec![request])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Converter(ConverterError::BatchItem { .. })
        ));
    }

    #[tokio::test]
    async fn single_conversion_applies_the_request_deadline() {
        let service = service_with(ConverterConfig::default());
        // Validation failures surface regardless of deadline plumbing.
        let err = service
            .convert_audio(
                &OpContext::new(),
                &AudioRequest {
                    data: String::new(),
                    is_url: false,
                    input_type: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Converter(ConverterError::EmptyInput)
        ));
    }
}
