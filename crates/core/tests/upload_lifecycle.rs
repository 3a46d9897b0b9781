//! Upload manager lifecycle integration tests.
//!
//! Drives the full stack (manager → storage service → provider policy)
//! over the in-memory mock transport: admission, saturation, progress,
//! cancellation, retries and shutdown.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use convertino_core::provider::ObjectTransport;
use convertino_core::testing::MockTransport;
use convertino_core::{
    OpContext, ProviderFactory, ProviderKind, S3Config, S3Service, StorageConfig, UploadBody,
    UploadManager, UploadManagerConfig, UploadOptions, UploadStatus,
};

struct TestHarness {
    manager: Arc<UploadManager>,
    transport: Arc<MockTransport>,
}

async fn harness(max_concurrent: usize) -> TestHarness {
    harness_with(max_concurrent, |_s3| {}).await
}

async fn harness_with(
    max_concurrent: usize,
    tweak: impl FnOnce(&mut S3Config),
) -> TestHarness {
    let transport = Arc::new(MockTransport::new());
    let shared = Arc::clone(&transport);
    let factory = ProviderFactory::new(Arc::new(move |_config| {
        Ok(Arc::clone(&shared) as Arc<dyn ObjectTransport>)
    }));

    let mut s3 = S3Config::new(ProviderKind::Minio, "https://s3.test.local", "media");
    s3.access_key = "ak".to_string();
    s3.secret_key = "sk".to_string();
    tweak(&mut s3);

    let service = Arc::new(
        S3Service::new(StorageConfig::new(s3), factory)
            .await
            .expect("storage service"),
    );

    let config = UploadManagerConfig {
        max_concurrent,
        ..Default::default()
    };

    TestHarness {
        manager: UploadManager::new(service, config),
        transport,
    }
}

async fn wait_for(
    manager: &UploadManager,
    id: uuid::Uuid,
    predicate: impl Fn(UploadStatus) -> bool,
) -> convertino_core::UploadInfo {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let info = manager.status(id).await.expect("record exists");
            if predicate(info.status) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status never matched")
}

async fn wait_settled(manager: &UploadManager) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if manager.stats().await.current_uploads == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("current_uploads never settled");
}

#[tokio::test]
async fn small_upload_completes_with_accurate_metrics() {
    let h = harness(3).await;
    let payload = vec![7u8; 1024];

    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "media/clip.ogg",
            UploadBody::from_bytes(payload.clone()),
            payload.len() as u64,
            UploadOptions::with_content_type("audio/ogg"),
        )
        .await
        .unwrap();
    assert_eq!(info.status, UploadStatus::Pending);

    let done = wait_for(&h.manager, info.id, |s| s == UploadStatus::Completed).await;
    assert_eq!(done.bytes_transferred, 1024);
    assert_eq!(done.total_bytes, 1024);
    assert_eq!(done.progress, 100.0);
    assert!(done.end_time.is_some());
    let result = done.result.as_ref().unwrap();
    assert_eq!(result.size, 1024);
    assert!(result.public_url.contains("media/clip.ogg"));

    assert_eq!(h.transport.object("media/clip.ogg").unwrap().data, payload);
    wait_settled(&h.manager).await;

    // Status lookup is idempotent: back-to-back snapshots with no
    // intervening transition are value-equal.
    let again = h.manager.status(info.id).await.unwrap();
    assert_eq!(done, again);
}

#[tokio::test]
async fn large_uploads_promote_to_multipart() {
    let h = harness_with(3, |s3| {
        s3.multipart_threshold = 1024;
        s3.chunk_size = 1024;
    })
    .await;

    // 3.5 chunks -> 4 parts.
    let payload = vec![1u8; 3584];
    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "media/large.bin",
            UploadBody::from_bytes(payload.clone()),
            payload.len() as u64,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    let done = wait_for(&h.manager, info.id, |s| s == UploadStatus::Completed).await;
    assert_eq!(done.result.unwrap().size, 3584);
    assert_eq!(h.transport.part_attempts(), 4);
    assert_eq!(h.transport.object("media/large.bin").unwrap().data, payload);
}

#[tokio::test]
async fn saturation_rejects_without_creating_a_record() {
    let h = harness(1).await;
    h.transport.set_put_delay(Duration::from_millis(500));

    let first = h
        .manager
        .start_upload(
            &OpContext::new(),
            "u1",
            UploadBody::from_bytes(vec![0u8; 64]),
            64,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    let second = h
        .manager
        .start_upload(
            &OpContext::new(),
            "u2",
            UploadBody::from_bytes(vec![0u8; 64]),
            64,
            UploadOptions::default(),
        )
        .await;
    assert!(matches!(
        second,
        Err(convertino_core::UploadError::CapacityReached(1))
    ));

    let stats = h.manager.stats().await;
    assert_eq!(stats.total_uploads, 1);
    assert_eq!(stats.current_uploads, 1);
    assert_eq!(stats.max_concurrent, 1);
    assert_eq!(stats.capacity_used, 100.0);

    // Once the first completes, capacity frees up again.
    wait_for(&h.manager, first.id, |s| s == UploadStatus::Completed).await;
    wait_settled(&h.manager).await;
    h.manager
        .start_upload(
            &OpContext::new(),
            "u3",
            UploadBody::from_bytes(vec![0u8; 64]),
            64,
            UploadOptions::default(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_in_flight_reaches_cancelled_and_frees_the_slot() {
    let h = harness(3).await;
    h.transport.set_put_delay(Duration::from_secs(30));

    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "slow",
            UploadBody::from_bytes(vec![0u8; 256]),
            256,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    wait_for(&h.manager, info.id, |s| s == UploadStatus::Uploading).await;
    h.manager.cancel(info.id).await.unwrap();

    let done = wait_for(&h.manager, info.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, UploadStatus::Cancelled);
    assert!(done.end_time.is_some());
    assert!(done.error.as_deref().unwrap_or("").contains("cancel"));

    wait_settled(&h.manager).await;

    // Terminal states are sticky: a second cancel reports the terminal
    // status instead of mutating it.
    let err = h.manager.cancel(info.id).await.unwrap_err();
    assert!(matches!(
        err,
        convertino_core::UploadError::CannotCancel(UploadStatus::Cancelled)
    ));
    assert_eq!(
        h.manager.status(info.id).await.unwrap().status,
        UploadStatus::Cancelled
    );
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let h = harness(3).await;
    h.transport.fail_with_statuses(&[503]);

    let payload = vec![9u8; 512];
    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "retry/me",
            UploadBody::from_bytes(payload.clone()),
            payload.len() as u64,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    let done = wait_for(&h.manager, info.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, UploadStatus::Completed);
    assert_eq!(done.result.unwrap().size, 512);
    // Exactly one retry.
    assert_eq!(h.transport.put_attempts(), 2);
}

#[tokio::test]
async fn forward_only_bodies_do_not_retry() {
    let h = harness(3).await;
    h.transport.fail_with_statuses(&[503]);

    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "stream/only",
            UploadBody::stream(&b"forward only payload"[..]),
            20,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    let done = wait_for(&h.manager, info.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, UploadStatus::Failed);
    assert!(done.error.is_some());
    assert_eq!(h.transport.put_attempts(), 1);
}

#[tokio::test]
async fn base64_totals_are_seeded_then_corrected() {
    let h = harness(3).await;
    let payload = b"png-ish payload bytes".to_vec();
    let encoded = STANDARD.encode(&payload);
    let data_url = format!("data:image/png;base64,{encoded}");

    let info = h
        .manager
        .start_base64_upload(
            &OpContext::new(),
            "b64/object",
            data_url,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    // The pre-decode total is the encoded length (plus the data-URL
    // header in this snapshot's case it is the full payload string).
    assert!(info.total_bytes as usize >= encoded.len());

    let done = wait_for(&h.manager, info.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, UploadStatus::Completed);
    assert_eq!(done.total_bytes, payload.len() as u64);
    assert_eq!(done.bytes_transferred, payload.len() as u64);

    let stored = h.transport.object("b64/object").unwrap();
    assert_eq!(stored.data, payload);
    // MIME sniffed from the data URL.
    assert_eq!(stored.content_type, "image/png");
}

#[tokio::test]
async fn malformed_data_url_fails_the_record() {
    let h = harness(3).await;

    let info = h
        .manager
        .start_base64_upload(
            &OpContext::new(),
            "bad/b64",
            "data:image/png;base64".to_string(),
            UploadOptions::default(),
        )
        .await
        .unwrap();

    let done = wait_for(&h.manager, info.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, UploadStatus::Failed);
    assert!(done.error.as_deref().unwrap().contains("base64")
        || done.error.as_deref().unwrap().contains("data URL"));
    wait_settled(&h.manager).await;
}

#[tokio::test]
async fn progress_events_are_published_and_bounded() {
    let h = harness_with(3, |s3| {
        // Keep the upload single-shot.
        s3.multipart_threshold = 10 * 1024 * 1024;
    })
    .await;

    let payload = vec![3u8; 256 * 1024];
    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "progress/watch",
            UploadBody::from_bytes(payload.clone()),
            payload.len() as u64,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    let mut events = h.manager.take_progress(info.id).await.expect("first take");
    assert!(h.manager.take_progress(info.id).await.is_none());

    wait_for(&h.manager, info.id, |s| s.is_terminal()).await;

    let mut last = 0u64;
    let mut seen = 0;
    while let Ok(event) = events.try_recv() {
        assert!(event.bytes_transferred >= last);
        if event.total_bytes > 0 {
            assert!(event.bytes_transferred <= event.total_bytes);
        }
        last = event.bytes_transferred;
        seen += 1;
    }
    assert!(seen > 0);
}

#[tokio::test]
async fn list_supports_status_filters() {
    let h = harness(3).await;

    let ok = h
        .manager
        .start_upload(
            &OpContext::new(),
            "ok",
            UploadBody::from_bytes(vec![1u8; 16]),
            16,
            UploadOptions::default(),
        )
        .await
        .unwrap();
    wait_for(&h.manager, ok.id, |s| s == UploadStatus::Completed).await;

    h.transport.fail_with_statuses(&[400]);
    let bad = h
        .manager
        .start_upload(
            &OpContext::new(),
            "bad",
            UploadBody::from_bytes(vec![1u8; 16]),
            16,
            UploadOptions::default(),
        )
        .await
        .unwrap();
    wait_for(&h.manager, bad.id, |s| s.is_terminal()).await;

    let all = h.manager.list(&[]).await;
    assert_eq!(all.len(), 2);

    let completed = h.manager.list(&[UploadStatus::Completed]).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, ok.id);

    let failed = h.manager.list(&[UploadStatus::Failed]).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, bad.id);

    let stats = h.manager.stats().await;
    assert_eq!(stats.status_counts.get(&UploadStatus::Completed), Some(&1));
    assert_eq!(stats.status_counts.get(&UploadStatus::Failed), Some(&1));
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let h = harness(3).await;
    h.transport.fail_with_statuses(&[403]);

    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "denied",
            UploadBody::from_bytes(vec![1u8; 16]),
            16,
            UploadOptions::default(),
        )
        .await
        .unwrap();

    let done = wait_for(&h.manager, info.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, UploadStatus::Failed);
    assert_eq!(h.transport.put_attempts(), 1);
}

#[tokio::test]
async fn shutdown_cancels_non_terminal_uploads() {
    let h = harness(3).await;
    h.transport.set_put_delay(Duration::from_secs(30));

    let info = h
        .manager
        .start_upload(
            &OpContext::new(),
            "doomed",
            UploadBody::from_bytes(vec![0u8; 64]),
            64,
            UploadOptions::default(),
        )
        .await
        .unwrap();
    wait_for(&h.manager, info.id, |s| s == UploadStatus::Uploading).await;

    h.manager.shutdown().await;

    // The in-flight transfer aborts; the record lands in a terminal
    // state either way (Cancelled or Failed).
    let done = wait_for(&h.manager, info.id, |s| s.is_terminal()).await;
    assert!(matches!(
        done.status,
        UploadStatus::Cancelled | UploadStatus::Failed
    ));
    wait_settled(&h.manager).await;
}
