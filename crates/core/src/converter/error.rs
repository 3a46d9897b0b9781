//! Error types for the converter module.

use std::path::PathBuf;
use thiserror::Error;

use crate::context::ContextError;
use crate::downloader::DownloadError;
use crate::encoding::PayloadError;

/// Errors that can occur during conversion.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// Fetching a URL payload failed.
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    /// The inbound base64 payload did not decode.
    #[error("base64 decode failed: {0}")]
    Decode(#[from] PayloadError),

    /// The payload was empty after decoding.
    #[error("empty input data")]
    EmptyInput,

    /// The payload exceeds the per-media-kind cap.
    #[error("input too large: {size} bytes (max: {max})")]
    InputTooLarge { size: u64, max: u64 },

    /// The external tool binary was not found.
    #[error("{tool} not found at path: {path}")]
    ToolNotFound { tool: String, path: PathBuf },

    /// The external tool exited non-zero; stderr is captured for
    /// observability.
    #[error("{tool} error: {reason}, stderr: {stderr}")]
    ToolFailed {
        tool: String,
        reason: String,
        stderr: String,
    },

    /// The external tool exited cleanly but produced nothing.
    #[error("{tool} produced no output")]
    EmptyOutput { tool: String },

    /// The operation context was cancelled or its deadline elapsed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// I/O error talking to the external tool.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A batch item failed; the index refers to the input order.
    #[error("conversion {index} failed: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<ConverterError>,
    },
}

impl ConverterError {
    /// Wrap a per-item failure with its batch position.
    pub fn batch_item(index: usize, source: ConverterError) -> Self {
        Self::BatchItem {
            index,
            source: Box::new(source),
        }
    }

    /// Whether the failure was a deadline/cancellation rather than a
    /// conversion problem.
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::Context(_))
    }
}
