//! Request, response and statistics types for the converters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An audio conversion request.
///
/// `data` is either a base64 payload (optionally carrying a
/// `data:<mime>;base64,` preamble) or an absolute URL when `is_url` is
/// set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRequest {
    pub data: String,

    #[serde(default)]
    pub is_url: bool,

    /// Optional input container hint (mp3, wav, m4a, ...). Advisory; the
    /// transcoder sniffs the real format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
}

/// Result of an audio conversion: an Opus-in-Ogg artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioResponse {
    /// `data:audio/ogg;codecs=opus;base64,...` artifact.
    pub data: String,
    /// Best-effort duration in whole seconds; zero when probing failed.
    pub duration: u64,
    /// Artifact size in bytes before base64 encoding.
    pub size: usize,
}

/// An image conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub data: String,

    #[serde(default)]
    pub is_url: bool,

    /// Bounding-box width; zero means the configured default.
    #[serde(default)]
    pub max_width: u32,

    /// Bounding-box height; zero means the configured default.
    #[serde(default)]
    pub max_height: u32,

    /// JPEG quality in (0, 100]; out-of-range values use the default.
    #[serde(default)]
    pub quality: u32,
}

/// Result of an image conversion: a progressive JPEG artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    /// `data:image/jpeg;base64,...` artifact.
    pub data: String,
    /// Best-effort output width in pixels; zero when probing failed.
    pub width: u32,
    /// Best-effort output height in pixels; zero when probing failed.
    pub height: u32,
    /// Artifact size in bytes before base64 encoding.
    pub size: usize,
}

/// Audio conversion counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioConverterStats {
    pub total_conversions: u64,
    pub failed_conversions: u64,
    /// Rolling average, `(old*9 + sample)/10`, seeded on first sample.
    pub avg_conversion_time: Duration,
}

impl AudioConverterStats {
    pub(crate) fn record_success(&mut self, elapsed: Duration) {
        self.total_conversions += 1;
        self.avg_conversion_time = rolling(self.avg_conversion_time, elapsed);
    }

    pub(crate) fn record_failure(&mut self) {
        self.total_conversions += 1;
        self.failed_conversions += 1;
    }
}

/// Image conversion counters, including which engine produced each
/// success.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageConverterStats {
    pub total_conversions: u64,
    pub failed_conversions: u64,
    pub vips_conversions: u64,
    pub ffmpeg_conversions: u64,
    /// Rolling average, `(old*9 + sample)/10`, seeded on first sample.
    pub avg_conversion_time: Duration,
}

impl ImageConverterStats {
    pub(crate) fn record_vips_success(&mut self, elapsed: Duration) {
        self.total_conversions += 1;
        self.vips_conversions += 1;
        self.avg_conversion_time = rolling(self.avg_conversion_time, elapsed);
    }

    pub(crate) fn record_ffmpeg_success(&mut self, elapsed: Duration) {
        self.total_conversions += 1;
        self.ffmpeg_conversions += 1;
        self.avg_conversion_time = rolling(self.avg_conversion_time, elapsed);
    }

    pub(crate) fn record_failure(&mut self) {
        self.total_conversions += 1;
        self.failed_conversions += 1;
    }
}

fn rolling(avg: Duration, sample: Duration) -> Duration {
    if avg.is_zero() {
        sample
    } else {
        (avg * 9 + sample) / 10
    }
}
