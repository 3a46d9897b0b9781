//! Audio conversion to a messaging-grade Opus stream in an Ogg
//! container.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::exec::pipe_through;
use super::probe;
use super::resolve_input;
use super::types::{AudioConverterStats, AudioRequest, AudioResponse};
use crate::context::OpContext;
use crate::downloader::Downloader;
use crate::encoding::to_data_url;
use crate::metrics;

const AUDIO_MIME: &str = "audio/ogg;codecs=opus";

/// Converts arbitrary audio payloads to mono 48 kHz Opus optimized for
/// voice transport.
pub struct AudioConverter {
    config: ConverterConfig,
    downloader: Arc<Downloader>,
    stats: Mutex<AudioConverterStats>,
}

impl AudioConverter {
    pub fn new(config: ConverterConfig, downloader: Arc<Downloader>) -> Self {
        Self {
            config,
            downloader,
            stats: Mutex::new(AudioConverterStats::default()),
        }
    }

    /// Convert one payload. Counters and the rolling average are updated
    /// on both outcomes.
    pub async fn convert(
        &self,
        ctx: &OpContext,
        request: &AudioRequest,
    ) -> Result<AudioResponse, ConverterError> {
        let start = Instant::now();
        let result = self.perform(ctx, request).await;

        match &result {
            Ok(response) => {
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&["audio", "success"])
                    .inc();
                metrics::CONVERSION_DURATION
                    .with_label_values(&["audio"])
                    .observe(start.elapsed().as_secs_f64());
                debug!(size = response.size, duration = response.duration, "audio converted");
                self.stats
                    .lock()
                    .expect("audio stats poisoned")
                    .record_success(start.elapsed());
            }
            Err(err) => {
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&["audio", "failed"])
                    .inc();
                debug!(%err, "audio conversion failed");
                self.stats
                    .lock()
                    .expect("audio stats poisoned")
                    .record_failure();
            }
        }

        result
    }

    async fn perform(
        &self,
        ctx: &OpContext,
        request: &AudioRequest,
    ) -> Result<AudioResponse, ConverterError> {
        let input = resolve_input(&self.downloader, ctx, &request.data, request.is_url).await?;

        if input.is_empty() {
            return Err(ConverterError::EmptyInput);
        }
        if input.len() as u64 > self.config.max_audio_size {
            return Err(ConverterError::InputTooLarge {
                size: input.len() as u64,
                max: self.config.max_audio_size,
            });
        }

        let output = self.transcode_to_opus(ctx, &input).await?;

        let duration = probe::audio_duration_secs(
            ctx,
            &self.config.ffprobe_path,
            Duration::from_secs(self.config.probe_timeout_secs),
            &output,
        )
        .await;

        Ok(AudioResponse {
            data: to_data_url(AUDIO_MIME, &output),
            duration,
            size: output.len(),
        })
    }

    /// The fixed voice profile: first audio stream only, libopus 128k
    /// VBR at maximum compression effort, voip tuning, 20 ms frames, 10%
    /// expected loss, 20 kHz cutoff, 48 kHz mono, Ogg container.
    async fn transcode_to_opus(
        &self,
        ctx: &OpContext,
        input: &[u8],
    ) -> Result<Vec<u8>, ConverterError> {
        let args = opus_args();
        pipe_through(ctx, "ffmpeg", &self.config.ffmpeg_path, &args, input).await
    }

    /// Convert several payloads in parallel with a per-item deadline.
    /// Results preserve input order.
    pub async fn convert_batch(
        &self,
        ctx: &OpContext,
        requests: &[AudioRequest],
    ) -> Vec<Result<AudioResponse, ConverterError>> {
        let item_timeout = Duration::from_secs(self.config.batch_item_timeout_secs);
        let futures = requests.iter().map(|request| {
            let item_ctx = ctx.child_with_timeout(item_timeout);
            async move { self.convert(&item_ctx, request).await }
        });
        futures::future::join_all(futures).await
    }

    /// Check that `data` is a payload the transcoder can open.
    pub async fn validate_input(&self, ctx: &OpContext, data: &[u8]) -> Result<(), ConverterError> {
        probe::validate_media(ctx, &self.config.ffprobe_path, data).await
    }

    /// Snapshot of the conversion counters.
    pub fn stats(&self) -> AudioConverterStats {
        self.stats.lock().expect("audio stats poisoned").clone()
    }
}

fn opus_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        "pipe:0",
        // Drop video streams and keep only the first audio stream;
        // WebM voice notes often carry both.
        "-vn",
        "-map",
        "0:a:0",
        "-c:a",
        "libopus",
        "-b:a",
        "128k",
        "-vbr",
        "on",
        "-compression_level",
        "10",
        "-application",
        "voip",
        "-frame_duration",
        "20",
        "-packet_loss",
        "10",
        "-cutoff",
        "20000",
        "-ar",
        "48000",
        "-ac",
        "1",
        "-f",
        "ogg",
        "-threads",
        "0",
        "pipe:1",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::testutil::fake_tool;
    use crate::downloader::DownloaderConfig;
    use crate::pool::BufferPool;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn converter_with(config: ConverterConfig) -> AudioConverter {
        let downloader = Arc::new(Downloader::new(
            DownloaderConfig::default(),
            Arc::new(BufferPool::default()),
        ));
        AudioConverter::new(config, downloader)
    }

    #[test]
    fn profile_args_pin_the_voice_contract() {
        let args = opus_args();
        let joined = args.join(" ");
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.contains("-application voip"));
        assert!(joined.contains("-ar 48000"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-f ogg"));
        assert!(joined.contains("-map 0:a:0"));
        assert!(joined.contains("-vn"));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let converter = converter_with(ConverterConfig::default());
        let request = AudioRequest {
            data: String::new(),
            is_url: false,
            input_type: None,
        };

        let err = converter.convert(&OpContext::new(), &request).await.unwrap_err();
        assert!(matches!(err, ConverterError::EmptyInput));

        let stats = converter.stats();
        assert_eq!(stats.total_conversions, 1);
        assert_eq!(stats.failed_conversions, 1);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_at_the_cap() {
        let mut config = ConverterConfig::default();
        config.max_audio_size = 8;
        let converter = converter_with(config);

        // Exactly at the cap passes validation (and then fails at the
        // missing tool); one byte past the cap is rejected up front.
        let at_cap = AudioRequest {
            data: STANDARD.encode(vec![0u8; 8]),
            is_url: false,
            input_type: None,
        };
        let over = AudioRequest {
            data: STANDARD.encode(vec![0u8; 9]),
            is_url: false,
            input_type: None,
        };

        let at_cap_err = converter.convert(&OpContext::new(), &at_cap).await.unwrap_err();
        assert!(!matches!(at_cap_err, ConverterError::InputTooLarge { .. }));

        let over_err = converter.convert(&OpContext::new(), &over).await.unwrap_err();
        assert!(matches!(over_err, ConverterError::InputTooLarge { size: 9, .. }));
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected() {
        let converter = converter_with(ConverterConfig::default());
        let request = AudioRequest {
            data: "!!not-base64!!".to_string(),
            is_url: false,
            input_type: None,
        };
        let err = converter.convert(&OpContext::new(), &request).await.unwrap_err();
        assert!(matches!(err, ConverterError::Decode(_)));
    }

    #[tokio::test]
    async fn successful_transcode_yields_an_opus_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConverterConfig::default();
        // A stand-in transcoder that echoes its stdin.
        config.ffmpeg_path = fake_tool(dir.path(), "ffmpeg", "cat");
        config.ffprobe_path = dir.path().join("missing-ffprobe");
        let converter = converter_with(config);

        let payload = b"RIFF....WAVEfmt fake audio";
        let request = AudioRequest {
            data: format!("data:audio/wav;base64,{}", STANDARD.encode(payload)),
            is_url: false,
            input_type: Some("wav".to_string()),
        };

        let response = converter.convert(&OpContext::new(), &request).await.unwrap();
        assert!(response.data.starts_with("data:audio/ogg;codecs=opus;base64,"));
        assert_eq!(response.size, payload.len());
        // Probe tool is absent; duration degrades to zero.
        assert_eq!(response.duration, 0);

        let stats = converter.stats();
        assert_eq!(stats.total_conversions, 1);
        assert_eq!(stats.failed_conversions, 0);
        assert!(!stats.avg_conversion_time.is_zero());
    }

    #[tokio::test]
    async fn transcoder_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConverterConfig::default();
        config.ffmpeg_path = fake_tool(dir.path(), "ffmpeg", "echo 'decode error' >&2; exit 1");
        let converter = converter_with(config);

        let request = AudioRequest {
            data: STANDARD.encode(b"payload"),
            is_url: false,
            input_type: None,
        };

        let err = converter.convert(&OpContext::new(), &request).await.unwrap_err();
        match err {
            ConverterError::ToolFailed { stderr, .. } => assert!(stderr.contains("decode error")),
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConverterConfig::default();
        config.ffmpeg_path = fake_tool(dir.path(), "ffmpeg", "cat");
        config.ffprobe_path = dir.path().join("missing-ffprobe");
        let converter = converter_with(config);

        let requests: Vec<AudioRequest> = (0..3)
            .map(|i| AudioRequest {
                data: STANDARD.encode(format!("payload-{i}")),
                is_url: false,
                input_type: None,
            })
            .collect();

        let results = converter
            .convert_batch(&OpContext::with_timeout(Duration::from_secs(30)), &requests)
            .await;

        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            let response = result.as_ref().unwrap();
            assert_eq!(response.size, format!("payload-{i}").len());
        }
    }

    #[tokio::test]
    async fn batch_keeps_successful_slots_alongside_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConverterConfig::default();
        config.ffmpeg_path = fake_tool(dir.path(), "ffmpeg", "cat");
        config.ffprobe_path = dir.path().join("missing-ffprobe");
        let converter = converter_with(config);

        let requests = vec![
            AudioRequest {
                data: STANDARD.encode(b"good"),
                is_url: false,
                input_type: None,
            },
            AudioRequest {
                data: String::new(), // fails validation
                is_url: false,
                input_type: None,
            },
        ];

        let results = converter.convert_batch(&OpContext::new(), &requests).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
