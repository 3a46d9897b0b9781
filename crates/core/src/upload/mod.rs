//! Asynchronous upload manager: a bounded, observable, cancellable
//! scheduler over the storage service.
//!
//! Locking: the manager lock serializes structural changes (record
//! insert/evict and the concurrency counter); each record carries its
//! own mutex for state transitions. The manager lock nests outside the
//! record lock, never the reverse.

mod reader;
mod types;

pub use types::{
    UploadError, UploadInfo, UploadManagerConfig, UploadManagerStats, UploadProgress, UploadStatus,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::OpContext;
use crate::metrics;
use crate::provider::{ProgressFn, S3Provider, UploadBody, UploadOptions, UploadResult};
use crate::storage::S3Service;
use reader::wrap_body;

struct RecordState {
    status: UploadStatus,
    progress: f64,
    bytes_transferred: u64,
    total_bytes: u64,
    end_time: Option<chrono::DateTime<Utc>>,
    error: Option<String>,
    result: Option<UploadResult>,
    /// Guards the exactly-once release of the concurrency slot, shared
    /// between the worker exit and the cancel path.
    slot_released: bool,
}

struct UploadEntry {
    id: Uuid,
    key: String,
    content_type: String,
    start_time: chrono::DateTime<Utc>,
    /// Job context; cancelling it aborts an in-flight transfer.
    ctx: OpContext,
    state: Mutex<RecordState>,
    progress_tx: mpsc::Sender<UploadProgress>,
    progress_rx: Mutex<Option<mpsc::Receiver<UploadProgress>>>,
}

impl UploadEntry {
    fn snapshot(&self) -> UploadInfo {
        let state = self.state.lock().expect("upload record poisoned");
        UploadInfo {
            id: self.id,
            key: self.key.clone(),
            status: state.status,
            progress: state.progress,
            bytes_transferred: state.bytes_transferred,
            total_bytes: state.total_bytes,
            start_time: self.start_time,
            end_time: state.end_time,
            error: state.error.clone(),
            result: state.result.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

struct ManagerState {
    uploads: HashMap<Uuid, Arc<UploadEntry>>,
    current: usize,
}

/// Tracks upload lifecycles, enforces the concurrency cap, publishes
/// progress and evicts old records.
pub struct UploadManager {
    service: Arc<S3Service>,
    config: UploadManagerConfig,
    state: RwLock<ManagerState>,
    shutdown: CancellationToken,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl UploadManager {
    /// Create the manager and start its retention sweep.
    pub fn new(service: Arc<S3Service>, config: UploadManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            service,
            config,
            state: RwLock::new(ManagerState {
                uploads: HashMap::new(),
                current: 0,
            }),
            shutdown: CancellationToken::new(),
            cleanup_handle: Mutex::new(None),
        });

        let weak = Arc::downgrade(&manager);
        let shutdown = manager.shutdown.clone();
        let interval = Duration::from_secs(manager.config.cleanup_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.evict_expired().await;
                    }
                }
            }
        });
        *manager
            .cleanup_handle
            .lock()
            .expect("cleanup handle poisoned") = Some(handle);

        manager
    }

    fn max_concurrent(&self) -> usize {
        self.config.effective_max_concurrent()
    }

    /// Start an upload from a byte source.
    ///
    /// Rejected immediately with a capacity error when all slots are
    /// taken; no record is created in that case.
    pub async fn start_upload(
        self: &Arc<Self>,
        ctx: &OpContext,
        key: &str,
        body: UploadBody,
        size: u64,
        mut opts: UploadOptions,
    ) -> Result<UploadInfo, UploadError> {
        let provider = self.service.provider()?;
        self.service.apply_default_options(&mut opts);

        let entry = self.admit(ctx, key, size, &opts).await?;
        // Snapshot before the worker can transition the record, so the
        // caller always observes the Pending admission.
        let admitted = entry.snapshot();

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .perform_upload(entry, provider, body, size, opts)
                .await;
        });

        Ok(admitted)
    }

    /// Start an upload from a base64 (or data-URL) payload.
    ///
    /// The pre-decode size is only an approximation, so `total_bytes`
    /// is seeded with the encoded length and corrected once the object
    /// size is known.
    pub async fn start_base64_upload(
        self: &Arc<Self>,
        ctx: &OpContext,
        key: &str,
        data: String,
        mut opts: UploadOptions,
    ) -> Result<UploadInfo, UploadError> {
        let provider = self.service.provider()?;
        self.service.apply_default_options(&mut opts);

        let approx_size = data.len() as u64;
        let entry = self.admit(ctx, key, approx_size, &opts).await?;
        let admitted = entry.snapshot();

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .perform_base64_upload(entry, provider, data, opts)
                .await;
        });

        Ok(admitted)
    }

    /// Register a Pending record and take a concurrency slot, both
    /// under the manager lock.
    async fn admit(
        &self,
        ctx: &OpContext,
        key: &str,
        total_bytes: u64,
        opts: &UploadOptions,
    ) -> Result<Arc<UploadEntry>, UploadError> {
        let (progress_tx, progress_rx) = mpsc::channel(self.config.progress_buffer.max(1));
        let entry = Arc::new(UploadEntry {
            id: Uuid::new_v4(),
            key: key.to_string(),
            content_type: opts.content_type.clone(),
            start_time: Utc::now(),
            ctx: ctx.child(),
            state: Mutex::new(RecordState {
                status: UploadStatus::Pending,
                progress: 0.0,
                bytes_transferred: 0,
                total_bytes,
                end_time: None,
                error: None,
                result: None,
                slot_released: false,
            }),
            progress_tx,
            progress_rx: Mutex::new(Some(progress_rx)),
        });

        {
            let mut state = self.state.write().await;
            if state.current >= self.max_concurrent() {
                return Err(UploadError::CapacityReached(self.max_concurrent()));
            }
            state.current += 1;
            state.uploads.insert(entry.id, Arc::clone(&entry));
        }

        metrics::ACTIVE_UPLOADS.inc();
        debug!(id = %entry.id, key, "upload admitted");
        Ok(entry)
    }

    /// Progress sink for one record: updates the authoritative fields
    /// under the record lock, then best-effort publishes an event.
    fn progress_callback(entry: &Arc<UploadEntry>, seeded_total: u64) -> ProgressFn {
        let entry = Arc::clone(entry);
        Arc::new(move |transferred, reported_total| {
            let event = {
                let mut state = entry.state.lock().expect("upload record poisoned");
                state.bytes_transferred = transferred;
                // A more accurate total can arrive mid-flight.
                let total = if reported_total > 0 {
                    reported_total
                } else {
                    seeded_total
                };
                if total > 0 {
                    state.total_bytes = total;
                }
                state.progress = if state.total_bytes > 0 {
                    transferred as f64 / state.total_bytes as f64 * 100.0
                } else {
                    0.0
                };

                UploadProgress {
                    upload_id: entry.id,
                    bytes_transferred: transferred,
                    total_bytes: state.total_bytes,
                    progress: state.progress,
                    timestamp: Utc::now(),
                }
            };

            // Advisory: dropped when the consumer lags.
            let _ = entry.progress_tx.try_send(event);
        })
    }

    /// Move Pending → Uploading; false when a cancel won the race.
    fn begin(entry: &UploadEntry) -> bool {
        let mut state = entry.state.lock().expect("upload record poisoned");
        if state.status == UploadStatus::Pending {
            state.status = UploadStatus::Uploading;
            true
        } else {
            false
        }
    }

    /// Record the worker outcome unless a terminal transition already
    /// happened.
    fn finish(entry: &UploadEntry, outcome: Result<UploadResult, String>) -> Option<UploadStatus> {
        let mut state = entry.state.lock().expect("upload record poisoned");
        if state.status.is_terminal() {
            return None;
        }

        state.end_time = Some(Utc::now());
        let status = match outcome {
            Ok(result) => {
                state.progress = 100.0;
                state.bytes_transferred = result.size;
                state.total_bytes = result.size;
                state.result = Some(result);
                state.status = UploadStatus::Completed;
                UploadStatus::Completed
            }
            Err(message) => {
                state.error = Some(message);
                state.status = UploadStatus::Failed;
                UploadStatus::Failed
            }
        };
        Some(status)
    }

    async fn perform_upload(
        self: Arc<Self>,
        entry: Arc<UploadEntry>,
        provider: Arc<dyn S3Provider>,
        body: UploadBody,
        size: u64,
        mut opts: UploadOptions,
    ) {
        if !Self::begin(&entry) {
            // Cancelled before the worker got scheduled.
            self.release_slot(&entry).await;
            return;
        }

        let callback = Self::progress_callback(&entry, size);
        if size > 0 {
            callback(0, size);
        }
        let wrapped = wrap_body(body, size, Arc::clone(&callback));
        // The wrapper is the single source of progress truth.
        opts.progress = None;

        let result = provider
            .upload(&entry.ctx, &entry.key, wrapped, size, opts)
            .await;

        self.conclude(&entry, result.map_err(|err| err.to_string()))
            .await;
    }

    async fn perform_base64_upload(
        self: Arc<Self>,
        entry: Arc<UploadEntry>,
        provider: Arc<dyn S3Provider>,
        data: String,
        mut opts: UploadOptions,
    ) {
        if !Self::begin(&entry) {
            self.release_slot(&entry).await;
            return;
        }

        // The provider reports decoded totals through the callback,
        // which corrects the seeded encoded-length total.
        opts.progress = Some(Self::progress_callback(&entry, data.len() as u64));

        let result = provider
            .upload_base64(&entry.ctx, &entry.key, &data, opts)
            .await;

        self.conclude(&entry, result.map_err(|err| err.to_string()))
            .await;
    }

    async fn conclude(&self, entry: &Arc<UploadEntry>, outcome: Result<UploadResult, String>) {
        match Self::finish(entry, outcome) {
            Some(UploadStatus::Completed) => {
                metrics::UPLOADS_TOTAL.with_label_values(&["success"]).inc();
                let size = entry
                    .state
                    .lock()
                    .expect("upload record poisoned")
                    .total_bytes;
                metrics::UPLOAD_BYTES.inc_by(size);
                info!(id = %entry.id, key = %entry.key, size, "upload completed");
            }
            Some(UploadStatus::Failed) => {
                metrics::UPLOADS_TOTAL.with_label_values(&["failed"]).inc();
                warn!(id = %entry.id, key = %entry.key, "upload failed");
            }
            // A cancel already terminated the record; keep its outcome.
            _ => {}
        }

        self.release_slot(entry).await;
    }

    /// Decrement the concurrency counter exactly once per record.
    async fn release_slot(&self, entry: &UploadEntry) {
        let release = {
            let mut state = entry.state.lock().expect("upload record poisoned");
            if state.slot_released {
                false
            } else {
                state.slot_released = true;
                true
            }
        };

        if release {
            let mut state = self.state.write().await;
            state.current = state.current.saturating_sub(1);
            metrics::ACTIVE_UPLOADS.dec();
        }
    }

    /// Cancel a Pending or Uploading record. Terminal records return an
    /// error and stay untouched.
    pub async fn cancel(&self, id: Uuid) -> Result<(), UploadError> {
        let entry = {
            let state = self.state.read().await;
            state.uploads.get(&id).cloned()
        }
        .ok_or(UploadError::NotFound(id))?;

        {
            let mut state = entry.state.lock().expect("upload record poisoned");
            match state.status {
                UploadStatus::Pending | UploadStatus::Uploading => {
                    state.status = UploadStatus::Cancelled;
                    state.end_time = Some(Utc::now());
                    state.error = Some("upload cancelled".to_string());
                }
                status => return Err(UploadError::CannotCancel(status)),
            }
        }

        // Abort the in-flight transfer.
        entry.ctx.cancel();
        metrics::UPLOADS_TOTAL.with_label_values(&["cancelled"]).inc();
        info!(id = %id, "upload cancelled");

        self.release_slot(&entry).await;
        Ok(())
    }

    /// Snapshot of one record.
    pub async fn status(&self, id: Uuid) -> Result<UploadInfo, UploadError> {
        let state = self.state.read().await;
        state
            .uploads
            .get(&id)
            .map(|entry| entry.snapshot())
            .ok_or(UploadError::NotFound(id))
    }

    /// Snapshots of all records, optionally filtered by status. An
    /// empty filter returns everything.
    pub async fn list(&self, statuses: &[UploadStatus]) -> Vec<UploadInfo> {
        let state = self.state.read().await;
        state
            .uploads
            .values()
            .map(|entry| entry.snapshot())
            .filter(|info| statuses.is_empty() || statuses.contains(&info.status))
            .collect()
    }

    /// Take the progress event stream for a record. Single consumer;
    /// subsequent calls return `None`.
    pub async fn take_progress(&self, id: Uuid) -> Option<mpsc::Receiver<UploadProgress>> {
        let state = self.state.read().await;
        let entry = state.uploads.get(&id)?;
        let receiver = entry
            .progress_rx
            .lock()
            .expect("progress receiver poisoned")
            .take();
        receiver
    }

    /// Manager statistics.
    pub async fn stats(&self) -> UploadManagerStats {
        let state = self.state.read().await;
        let mut status_counts: HashMap<UploadStatus, usize> = HashMap::new();
        for entry in state.uploads.values() {
            let status = entry
                .state
                .lock()
                .expect("upload record poisoned")
                .status;
            *status_counts.entry(status).or_default() += 1;
        }

        let max = self.max_concurrent();
        UploadManagerStats {
            total_uploads: state.uploads.len(),
            current_uploads: state.current,
            max_concurrent: max,
            status_counts,
            capacity_used: state.current as f64 / max as f64 * 100.0,
        }
    }

    /// Evict records whose end time is older than the retention window.
    async fn evict_expired(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retention_secs as i64);
        let mut state = self.state.write().await;
        let before = state.uploads.len();
        state.uploads.retain(|_, entry| {
            let record = entry.state.lock().expect("upload record poisoned");
            match record.end_time {
                Some(end) => end >= cutoff,
                None => true,
            }
        });

        let evicted = before - state.uploads.len();
        if evicted > 0 {
            debug!(evicted, "evicted old upload records");
        }
    }

    /// Stop the retention sweep and cancel every non-terminal upload.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .cleanup_handle
            .lock()
            .expect("cleanup handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let entries: Vec<Arc<UploadEntry>> = {
            let state = self.state.read().await;
            state.uploads.values().cloned().collect()
        };
        for entry in entries {
            let non_terminal = !entry
                .state
                .lock()
                .expect("upload record poisoned")
                .status
                .is_terminal();
            if non_terminal {
                entry.ctx.cancel();
            }
        }
        info!("upload manager stopped");
    }

    #[cfg(test)]
    pub(crate) async fn run_retention_sweep(&self) {
        self.evict_expired().await;
    }

    #[cfg(test)]
    pub(crate) async fn force_end_time(&self, id: Uuid, end: chrono::DateTime<Utc>) {
        let state = self.state.read().await;
        if let Some(entry) = state.uploads.get(&id) {
            entry
                .state
                .lock()
                .expect("upload record poisoned")
                .end_time = Some(end);
        }
    }
}
