//! Generic S3-compatible provider: all upload policy over an
//! [`ObjectTransport`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use super::body::UploadBody;
use super::error::ProviderError;
use super::transport::{CompletedPart, ObjectTransport, PutOptions, PutOutcome};
use super::types::{ObjectInfo, ProgressFn, S3Config, UploadOptions, UploadResult};
use super::S3Provider;
use crate::context::OpContext;
use crate::encoding::decode_payload;

const READ_CHUNK: usize = 64 * 1024;

/// Provider implementation shared by every S3-compatible tag.
pub struct S3CompatProvider {
    transport: Arc<dyn ObjectTransport>,
    config: S3Config,
}

impl S3CompatProvider {
    pub fn new(config: S3Config, transport: Arc<dyn ObjectTransport>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn label(&self) -> &'static str {
        self.config.provider.as_str()
    }

    fn put_options(opts: &UploadOptions) -> PutOptions {
        PutOptions {
            content_type: opts.content_type.clone(),
            metadata: opts.metadata.clone(),
            public: opts.public,
            storage_class: opts.storage_class.clone(),
        }
    }

    fn build_result(&self, key: &str, outcome: PutOutcome, opts: &UploadOptions, start: Instant) -> UploadResult {
        let expires_at = if opts.expiration_days > 0 {
            Some(Utc::now() + chrono::Duration::days(i64::from(opts.expiration_days)))
        } else {
            None
        };

        UploadResult {
            key: key.to_string(),
            public_url: self.public_url(key),
            size: outcome.size,
            etag: outcome.etag,
            version_id: outcome.version_id,
            expires_at,
            provider: self.label().to_string(),
            processing_time: start.elapsed(),
        }
    }

    /// Drain the body, reporting progress per chunk.
    async fn read_all(
        body: &mut UploadBody,
        size_hint: u64,
        progress: Option<&ProgressFn>,
    ) -> std::io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(size_hint.min(64 * 1024 * 1024) as usize);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut total: u64 = 0;

        loop {
            let n = body.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
            total += n as u64;
            if let Some(callback) = progress {
                callback(total, size_hint);
            }
        }
        Ok(data)
    }

    /// Read up to `chunk_size` bytes; a short result marks EOF.
    async fn read_chunk(body: &mut UploadBody, chunk_size: usize) -> std::io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(chunk_size);
        let mut scratch = vec![0u8; READ_CHUNK];

        while data.len() < chunk_size {
            let want = (chunk_size - data.len()).min(scratch.len());
            let n = body.read(&mut scratch[..want]).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&scratch[..n]);
        }
        Ok(data)
    }

    fn io_error(&self, operation: &str, key: &str, err: std::io::Error) -> ProviderError {
        ProviderError::operation(
            self.label(),
            operation,
            key,
            ProviderError::Network(err.to_string()),
        )
    }
}

#[async_trait]
impl S3Provider for S3CompatProvider {
    fn name(&self) -> &str {
        self.label()
    }

    async fn upload(
        &self,
        ctx: &OpContext,
        key: &str,
        mut body: UploadBody,
        size: u64,
        opts: UploadOptions,
    ) -> Result<UploadResult, ProviderError> {
        if size >= self.config.multipart_threshold {
            return self.multipart_upload(ctx, key, body, opts).await;
        }

        let start = Instant::now();
        let put_opts = Self::put_options(&opts);
        let retries = self.config.retry_count;

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                // Rewind the source so the retry re-reads from zero.
                match body.rewind().await {
                    Ok(true) => {
                        if let Some(callback) = &opts.progress {
                            callback(0, size);
                        }
                    }
                    Ok(false) => {
                        return Err(ProviderError::operation(
                            self.label(),
                            "upload",
                            key,
                            ProviderError::NotRewindable,
                        ))
                    }
                    Err(err) => return Err(self.io_error("upload", key, err)),
                }
            }

            let data = Self::read_all(&mut body, size, opts.progress.as_ref())
                .await
                .map_err(|err| self.io_error("upload", key, err))?;

            let attempt_ctx = ctx.child_with_timeout(self.config.upload_timeout());
            match self
                .transport
                .put_object(&attempt_ctx, key, data, &put_opts)
                .await
            {
                Ok(outcome) => {
                    debug!(key, size = outcome.size, attempt, "object stored");
                    return Ok(self.build_result(key, outcome, &opts, start));
                }
                Err(err) => {
                    if !err.is_retryable() || attempt == retries {
                        return Err(ProviderError::operation(self.label(), "upload", key, err));
                    }
                    if !body.is_seekable() {
                        // Retry needs a rewindable source; surface the
                        // first error instead.
                        return Err(ProviderError::operation(self.label(), "upload", key, err));
                    }

                    warn!(key, attempt, %err, "upload attempt failed, retrying");
                    attempt += 1;
                    let backoff = Duration::from_secs(u64::from(attempt));
                    if ctx.run(tokio::time::sleep(backoff)).await.is_err() {
                        return Err(ProviderError::operation(
                            self.label(),
                            "upload",
                            key,
                            ctx.check().unwrap_err().into(),
                        ));
                    }
                }
            }
        }
    }

    async fn multipart_upload(
        &self,
        ctx: &OpContext,
        key: &str,
        mut body: UploadBody,
        opts: UploadOptions,
    ) -> Result<UploadResult, ProviderError> {
        let start = Instant::now();
        let put_opts = Self::put_options(&opts);
        let chunk_size = if opts.chunk_size > 0 {
            opts.chunk_size
        } else {
            self.config.chunk_size
        } as usize;

        let upload_id = self
            .transport
            .create_multipart(ctx, key, &put_opts)
            .await
            .map_err(|err| {
                ProviderError::operation(self.label(), "multipart_upload", key, err)
            })?;

        let mut parts: Vec<CompletedPart> = Vec::new();
        let mut part_number: u32 = 1;
        let mut transferred: u64 = 0;

        loop {
            let chunk = match Self::read_chunk(&mut body, chunk_size).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = self.transport.abort_multipart(ctx, key, &upload_id).await;
                    return Err(self.io_error("multipart_upload", key, err));
                }
            };

            let eof = chunk.len() < chunk_size;
            if chunk.is_empty() {
                break;
            }

            transferred += chunk.len() as u64;
            match self
                .transport
                .upload_part(ctx, key, &upload_id, part_number, chunk)
                .await
            {
                Ok(part) => {
                    if let Some(callback) = &opts.progress {
                        // Total is unknown while streaming parts.
                        callback(transferred, 0);
                    }
                    parts.push(part);
                    part_number += 1;
                }
                Err(err) => {
                    warn!(key, part_number, %err, "part failed, aborting multipart upload");
                    let _ = self.transport.abort_multipart(ctx, key, &upload_id).await;
                    return Err(ProviderError::operation(
                        self.label(),
                        "multipart_upload",
                        key,
                        err,
                    ));
                }
            }

            if eof {
                break;
            }
        }

        match self
            .transport
            .complete_multipart(ctx, key, &upload_id, &parts)
            .await
        {
            Ok(outcome) => {
                debug!(key, parts = parts.len(), size = outcome.size, "multipart upload complete");
                Ok(self.build_result(key, outcome, &opts, start))
            }
            Err(err) => {
                let _ = self.transport.abort_multipart(ctx, key, &upload_id).await;
                Err(ProviderError::operation(
                    self.label(),
                    "multipart_upload",
                    key,
                    err,
                ))
            }
        }
    }

    async fn upload_base64(
        &self,
        ctx: &OpContext,
        key: &str,
        data: &str,
        mut opts: UploadOptions,
    ) -> Result<UploadResult, ProviderError> {
        let (mime, bytes) = decode_payload(data).map_err(|err| {
            ProviderError::operation(
                self.label(),
                "decode_base64",
                key,
                ProviderError::InvalidBase64(err),
            )
        })?;

        // The data URL's MIME wins only when the caller left the
        // content type at its default.
        if let Some(mime) = mime {
            if opts.content_type.is_empty()
                || opts.content_type == "application/octet-stream"
            {
                opts.content_type = mime;
            }
        }

        let size = bytes.len() as u64;
        self.upload(ctx, key, UploadBody::from_bytes(bytes), size, opts)
            .await
    }

    fn public_url(&self, key: &str) -> String {
        self.config.public_url(key)
    }

    async fn delete_object(&self, ctx: &OpContext, key: &str) -> Result<(), ProviderError> {
        self.transport
            .delete_object(ctx, key)
            .await
            .map_err(|err| ProviderError::operation(self.label(), "delete", key, err))
    }

    async fn object_info(&self, ctx: &OpContext, key: &str) -> Result<ObjectInfo, ProviderError> {
        self.transport
            .head_object(ctx, key)
            .await
            .map_err(|err| ProviderError::operation(self.label(), "stat_object", key, err))
    }

    async fn health_check(&self, ctx: &OpContext) -> Result<(), ProviderError> {
        let exists = self
            .transport
            .bucket_exists(ctx)
            .await
            .map_err(|err| ProviderError::operation(self.label(), "health_check", "", err))?;

        if !exists {
            return Err(ProviderError::operation(
                self.label(),
                "health_check",
                "",
                ProviderError::BucketNotFound,
            ));
        }
        Ok(())
    }
}
