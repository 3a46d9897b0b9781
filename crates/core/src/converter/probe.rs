//! Best-effort ffprobe metadata extraction on in-memory artifacts.
//!
//! Probes run under a short bounded deadline and report zero values on
//! any failure rather than failing the conversion.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::error::ConverterError;
use super::exec::pipe_through;
use crate::context::OpContext;

fn base_args() -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ]
}

/// Duration of an audio artifact in whole seconds; zero when probing
/// fails for any reason.
pub(crate) async fn audio_duration_secs(
    ctx: &OpContext,
    ffprobe: &Path,
    timeout: Duration,
    data: &[u8],
) -> u64 {
    let probe_ctx = ctx.child_with_timeout(timeout);
    let mut args = base_args();
    args.extend([
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
    ]);

    match pipe_through(&probe_ctx, "ffprobe", ffprobe, &args, data).await {
        Ok(output) => String::from_utf8_lossy(&output)
            .trim()
            .parse::<f64>()
            .map(|secs| secs as u64)
            .unwrap_or(0),
        Err(err) => {
            debug!(%err, "duration probe failed");
            0
        }
    }
}

/// Pixel dimensions of an image artifact; `(0, 0)` when probing fails.
pub(crate) async fn image_dimensions(
    ctx: &OpContext,
    ffprobe: &Path,
    timeout: Duration,
    data: &[u8],
) -> (u32, u32) {
    let probe_ctx = ctx.child_with_timeout(timeout);
    let mut args = base_args();
    args.extend([
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
    ]);

    match pipe_through(&probe_ctx, "ffprobe", ffprobe, &args, data).await {
        Ok(output) => parse_dimensions(&String::from_utf8_lossy(&output)),
        Err(err) => {
            debug!(%err, "dimension probe failed");
            (0, 0)
        }
    }
}

fn parse_dimensions(output: &str) -> (u32, u32) {
    let line = output.trim();
    let mut parts = line.split(',');
    let width = parts.next().and_then(|w| w.trim().parse().ok());
    let height = parts.next().and_then(|h| h.trim().parse().ok());
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        _ => (0, 0),
    }
}

/// Validate that `data` is a media payload ffprobe can open.
pub(crate) async fn validate_media(
    ctx: &OpContext,
    ffprobe: &Path,
    data: &[u8],
) -> Result<(), ConverterError> {
    // ffprobe prints stream info to stderr; only the exit status
    // matters, so route it through the shared runner and accept the
    // empty-stdout outcome as success.
    let mut args = base_args();
    args.extend([
        "-show_entries".to_string(),
        "format=format_name".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
    ]);

    match pipe_through(ctx, "ffprobe", ffprobe, &args, data).await {
        Ok(_) => Ok(()),
        Err(ConverterError::EmptyOutput { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}
