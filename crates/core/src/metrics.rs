//! Prometheus metrics for the conversion and upload cores.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

/// Conversions total by media kind and result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("convertino_conversions_total", "Total media conversions"),
        &["kind", "result"], // kind: "audio", "image"; result: "success", "failed"
    )
    .unwrap()
});

/// Conversion duration in seconds by media kind.
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "convertino_conversion_duration_seconds",
            "Duration of media conversions",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0, 300.0]),
        &["kind"],
    )
    .unwrap()
});

/// Downloads total by result.
pub static DOWNLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("convertino_downloads_total", "Total remote media downloads"),
        &["result"],
    )
    .unwrap()
});

/// Bytes fetched by the downloader.
pub static DOWNLOAD_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("convertino_download_bytes_total", "Total bytes downloaded").unwrap()
});

/// Uploads total by result.
pub static UPLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("convertino_uploads_total", "Total object storage uploads"),
        &["result"], // "success", "failed", "cancelled"
    )
    .unwrap()
});

/// Bytes shipped to object storage.
pub static UPLOAD_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("convertino_upload_bytes_total", "Total bytes uploaded").unwrap()
});

/// Uploads currently holding a concurrency slot.
pub static ACTIVE_UPLOADS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("convertino_active_uploads", "Uploads currently in flight").unwrap()
});

/// All core metrics, for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(DOWNLOADS_TOTAL.clone()),
        Box::new(DOWNLOAD_BYTES.clone()),
        Box::new(UPLOADS_TOTAL.clone()),
        Box::new(UPLOAD_BYTES.clone()),
        Box::new(ACTIVE_UPLOADS.clone()),
    ]
}
