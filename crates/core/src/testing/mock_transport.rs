//! In-memory transport for exercising upload policy without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::context::OpContext;
use crate::provider::{
    CompletedPart, ObjectInfo, ObjectTransport, ProviderError, PutOptions, PutOutcome,
};

/// A stored object, for assertions.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub storage_class: String,
}

/// Mock implementation of [`ObjectTransport`].
///
/// Controllable behavior for tests:
/// - script transient failures (e.g. one 503, then success)
/// - inject per-call latency so cancellation can land mid-flight
/// - flip bucket reachability for health-check failures
/// - inspect stored objects, attempt counts and aborted uploads
#[derive(Default)]
pub struct MockTransport {
    objects: Mutex<HashMap<String, StoredObject>>,
    pending_parts: Mutex<HashMap<String, Vec<(u32, Vec<u8>)>>>,
    pending_opts: Mutex<HashMap<String, PutOptions>>,
    scripted_failures: Mutex<VecDeque<u16>>,
    aborted: Mutex<Vec<String>>,
    put_delay: Mutex<Duration>,
    bucket_exists: Mutex<bool>,
    put_attempts: AtomicU64,
    part_attempts: AtomicU64,
    sequence: AtomicU64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            bucket_exists: Mutex::new(true),
            ..Default::default()
        }
    }

    /// Script the next put/part calls to fail with the given HTTP
    /// statuses, in order.
    pub fn fail_with_statuses(&self, statuses: &[u16]) {
        let mut scripted = self.scripted_failures.lock().unwrap();
        scripted.extend(statuses.iter().copied());
    }

    /// Delay every put/part call; cancellation is observed during the
    /// delay.
    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = delay;
    }

    /// Control the health-check outcome.
    pub fn set_bucket_exists(&self, exists: bool) {
        *self.bucket_exists.lock().unwrap() = exists;
    }

    /// Object stored at `key`, if any.
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Number of single-shot put attempts observed.
    pub fn put_attempts(&self) -> u64 {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Number of part uploads observed.
    pub fn part_attempts(&self) -> u64 {
        self.part_attempts.load(Ordering::SeqCst)
    }

    /// Upload ids that were aborted.
    pub fn aborted_uploads(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    async fn observe_delay(&self, ctx: &OpContext) -> Result<(), ProviderError> {
        let delay = *self.put_delay.lock().unwrap();
        if !delay.is_zero() {
            ctx.run(tokio::time::sleep(delay)).await?;
        }
        Ok(())
    }

    fn take_scripted_failure(&self) -> Option<u16> {
        self.scripted_failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ObjectTransport for MockTransport {
    async fn put_object(
        &self,
        ctx: &OpContext,
        key: &str,
        body: Vec<u8>,
        opts: &PutOptions,
    ) -> Result<PutOutcome, ProviderError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.observe_delay(ctx).await?;

        if let Some(status) = self.take_scripted_failure() {
            return Err(ProviderError::HttpStatus { status });
        }

        let size = body.len() as u64;
        let etag = format!("mock-etag-{}", self.next_seq());
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: body,
                content_type: opts.content_type.clone(),
                metadata: opts.metadata.clone(),
                storage_class: opts.storage_class.clone(),
            },
        );

        Ok(PutOutcome {
            size,
            etag,
            version_id: None,
        })
    }

    async fn create_multipart(
        &self,
        _ctx: &OpContext,
        key: &str,
        opts: &PutOptions,
    ) -> Result<String, ProviderError> {
        let upload_id = format!("mpu-{}-{}", key.replace('/', "_"), self.next_seq());
        self.pending_parts
            .lock()
            .unwrap()
            .insert(upload_id.clone(), Vec::new());
        self.pending_opts
            .lock()
            .unwrap()
            .insert(upload_id.clone(), opts.clone());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        ctx: &OpContext,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, ProviderError> {
        self.part_attempts.fetch_add(1, Ordering::SeqCst);
        self.observe_delay(ctx).await?;

        if let Some(status) = self.take_scripted_failure() {
            return Err(ProviderError::HttpStatus { status });
        }

        let etag = format!("mock-part-{}", self.next_seq());
        let mut pending = self.pending_parts.lock().unwrap();
        let parts = pending
            .get_mut(upload_id)
            .ok_or_else(|| ProviderError::ObjectNotFound(upload_id.to_string()))?;
        parts.push((part_number, body));

        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        _ctx: &OpContext,
        key: &str,
        upload_id: &str,
        _parts: &[CompletedPart],
    ) -> Result<PutOutcome, ProviderError> {
        let mut stored_parts = self
            .pending_parts
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| ProviderError::ObjectNotFound(upload_id.to_string()))?;
        let opts = self
            .pending_opts
            .lock()
            .unwrap()
            .remove(upload_id)
            .unwrap_or_default();

        stored_parts.sort_by_key(|(number, _)| *number);
        let data: Vec<u8> = stored_parts
            .into_iter()
            .flat_map(|(_, body)| body)
            .collect();
        let size = data.len() as u64;
        let etag = format!("mock-etag-{}", self.next_seq());

        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: opts.content_type,
                metadata: opts.metadata,
                storage_class: opts.storage_class,
            },
        );

        Ok(PutOutcome {
            size,
            etag,
            version_id: None,
        })
    }

    async fn abort_multipart(
        &self,
        _ctx: &OpContext,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError> {
        self.pending_parts.lock().unwrap().remove(upload_id);
        self.pending_opts.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }

    async fn delete_object(&self, _ctx: &OpContext, key: &str) -> Result<(), ProviderError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn head_object(&self, _ctx: &OpContext, key: &str) -> Result<ObjectInfo, ProviderError> {
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| ProviderError::ObjectNotFound(key.to_string()))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: object.data.len() as u64,
            etag: "mock-etag".to_string(),
            content_type: object.content_type.clone(),
            last_modified: Utc::now(),
            metadata: object.metadata.clone(),
            storage_class: object.storage_class.clone(),
            version_id: None,
        })
    }

    async fn bucket_exists(&self, _ctx: &OpContext) -> Result<bool, ProviderError> {
        Ok(*self.bucket_exists.lock().unwrap())
    }
}
