//! The SDK seam: the minimal wire operations a concrete store adapter
//! must offer.
//!
//! The crate implements all upload policy (retries, multipart
//! promotion, progress) generically over this trait; vendor SDK
//! bindings live outside the library.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::ProviderError;
use super::types::ObjectInfo;
use crate::context::OpContext;

/// Static options forwarded with each put.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub public: bool,
    pub storage_class: String,
}

/// Outcome of a completed put (single-shot or multipart).
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub size: u64,
    pub etag: String,
    pub version_id: Option<String>,
}

/// A finished multipart part.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Wire operations against one bucket of one remote store.
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Store `body` at `key` in a single request.
    async fn put_object(
        &self,
        ctx: &OpContext,
        key: &str,
        body: Vec<u8>,
        opts: &PutOptions,
    ) -> Result<PutOutcome, ProviderError>;

    /// Negotiate a new multipart upload; returns its upload id.
    async fn create_multipart(
        &self,
        ctx: &OpContext,
        key: &str,
        opts: &PutOptions,
    ) -> Result<String, ProviderError>;

    /// Upload one part.
    async fn upload_part(
        &self,
        ctx: &OpContext,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, ProviderError>;

    /// Complete a multipart upload from its accumulated parts.
    async fn complete_multipart(
        &self,
        ctx: &OpContext,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<PutOutcome, ProviderError>;

    /// Abort a multipart upload, discarding stored parts.
    async fn abort_multipart(
        &self,
        ctx: &OpContext,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError>;

    /// Delete an object.
    async fn delete_object(&self, ctx: &OpContext, key: &str) -> Result<(), ProviderError>;

    /// Fetch object metadata.
    async fn head_object(&self, ctx: &OpContext, key: &str) -> Result<ObjectInfo, ProviderError>;

    /// Whether the configured bucket exists and is reachable.
    async fn bucket_exists(&self, ctx: &OpContext) -> Result<bool, ProviderError>;
}
