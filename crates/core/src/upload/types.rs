//! Upload lifecycle types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::provider::UploadResult;
use crate::storage::StorageError;

/// Upload lifecycle states.
///
/// Valid paths: Pending → Uploading → {Completed, Failed}, and
/// Cancelled from any non-terminal state. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of an upload record. Callers never receive
/// live handles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadInfo {
    pub id: Uuid,
    pub key: String,
    pub status: UploadStatus,
    /// Percentage derived from bytes/total. On base64 input the total
    /// starts as the encoded length, so the percentage can transiently
    /// exceed 100 before the post-completion correction.
    pub progress: f64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UploadResult>,
    pub content_type: String,
}

/// Advisory progress event published on a bounded channel. Events are
/// dropped when the channel is full; poll the record snapshot for
/// authoritative values.
#[derive(Debug, Clone, Serialize)]
pub struct UploadProgress {
    pub upload_id: Uuid,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
}

/// Upload manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadManagerConfig {
    /// Concurrency cap; non-positive values fall back to 3.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Retention sweep interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// How long terminal records stay addressable after their end time.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Per-record progress channel capacity.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_retention() -> u64 {
    24 * 3600
}

fn default_progress_buffer() -> usize {
    10
}

impl Default for UploadManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            cleanup_interval_secs: default_cleanup_interval(),
            retention_secs: default_retention(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl UploadManagerConfig {
    /// Effective concurrency cap.
    pub fn effective_max_concurrent(&self) -> usize {
        if self.max_concurrent == 0 {
            default_max_concurrent()
        } else {
            self.max_concurrent
        }
    }
}

/// Errors produced by the upload manager.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("maximum concurrent uploads reached ({0})")]
    CapacityReached(usize),

    #[error("upload not found: {0}")]
    NotFound(Uuid),

    #[error("cannot cancel upload in status: {0}")]
    CannotCancel(UploadStatus),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Manager-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct UploadManagerStats {
    /// Records currently addressable (terminal records included until
    /// retention evicts them).
    pub total_uploads: usize,
    /// Uploads holding a concurrency slot.
    pub current_uploads: usize,
    pub max_concurrent: usize,
    pub status_counts: HashMap<UploadStatus, usize>,
    /// `current / max * 100`.
    pub capacity_used: f64,
}
