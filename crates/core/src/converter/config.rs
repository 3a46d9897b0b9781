//! Configuration for the converter module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which engine handles the primary image path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageEngine {
    /// Use vips when the binary is on PATH, ffmpeg otherwise.
    #[default]
    Auto,
    /// Force the vips path.
    Vips,
    /// Force the ffmpeg path (disables the primary engine).
    Ffmpeg,
}

/// Configuration for the audio and image converters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to the ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Path to the vips binary.
    #[serde(default = "default_vips_path")]
    pub vips_path: PathBuf,

    /// Image engine selection.
    #[serde(default)]
    pub image_engine: ImageEngine,

    /// Maximum audio payload size in bytes.
    #[serde(default = "default_max_audio_size")]
    pub max_audio_size: u64,

    /// Maximum image payload size in bytes.
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,

    /// Default JPEG quality when the request leaves it unset or invalid.
    #[serde(default = "default_quality")]
    pub default_quality: u32,

    /// Default bounding-box width in pixels.
    #[serde(default = "default_max_dimension")]
    pub default_max_width: u32,

    /// Default bounding-box height in pixels.
    #[serde(default = "default_max_dimension")]
    pub default_max_height: u32,

    /// Per-item deadline for batch conversions, in seconds.
    #[serde(default = "default_batch_item_timeout")]
    pub batch_item_timeout_secs: u64,

    /// Deadline for best-effort metadata probes, in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_vips_path() -> PathBuf {
    PathBuf::from("vips")
}

fn default_max_audio_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_image_size() -> u64 {
    200 * 1024 * 1024
}

fn default_quality() -> u32 {
    95
}

fn default_max_dimension() -> u32 {
    1920
}

fn default_batch_item_timeout() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    2
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            vips_path: default_vips_path(),
            image_engine: ImageEngine::default(),
            max_audio_size: default_max_audio_size(),
            max_image_size: default_max_image_size(),
            default_quality: default_quality(),
            default_max_width: default_max_dimension(),
            default_max_height: default_max_dimension(),
            batch_item_timeout_secs: default_batch_item_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl ConverterConfig {
    /// Creates a config with custom ffmpeg/ffprobe paths.
    pub fn with_paths(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            ..Default::default()
        }
    }

    /// Sets the image engine.
    pub fn with_image_engine(mut self, engine: ImageEngine) -> Self {
        self.image_engine = engine;
        self
    }

    /// Sets the batch per-item timeout.
    pub fn with_batch_item_timeout(mut self, secs: u64) -> Self {
        self.batch_item_timeout_secs = secs;
        self
    }
}
