//! Storage provider capability surface.
//!
//! The core depends on this abstract capability set; concrete wire
//! bindings implement [`ObjectTransport`] and are injected through the
//! factory.

mod body;
mod error;
mod factory;
mod s3compat;
mod transport;
mod types;

pub use body::{SeekableSource, StreamSource, UploadBody};
pub use error::ProviderError;
pub use factory::{ProviderFactory, TransportBuilder};
pub use s3compat::S3CompatProvider;
pub use transport::{CompletedPart, ObjectTransport, PutOptions, PutOutcome};
pub use types::{ObjectInfo, ProgressFn, ProviderKind, S3Config, UploadOptions, UploadResult};

use async_trait::async_trait;

use crate::context::OpContext;

/// Streaming upload and metadata operations over one remote store.
#[async_trait]
pub trait S3Provider: Send + Sync {
    /// The provider tag, for labels and diagnostics.
    fn name(&self) -> &str;

    /// Upload `body` to `key`.
    ///
    /// Sizes at or above the multipart threshold may be promoted to
    /// [`multipart_upload`](Self::multipart_upload). Transient failures
    /// are retried with linear backoff when the body can be rewound;
    /// a forward-only body gets exactly one attempt.
    async fn upload(
        &self,
        ctx: &OpContext,
        key: &str,
        body: UploadBody,
        size: u64,
        opts: UploadOptions,
    ) -> Result<UploadResult, ProviderError>;

    /// Stream `body` to `key` in parts; a part failure aborts the
    /// upload, EOF completes it.
    async fn multipart_upload(
        &self,
        ctx: &OpContext,
        key: &str,
        body: UploadBody,
        opts: UploadOptions,
    ) -> Result<UploadResult, ProviderError>;

    /// Decode a raw-base64 or `data:` URL payload and upload it. A MIME
    /// type carried by the data URL applies when the options left the
    /// content type unset.
    async fn upload_base64(
        &self,
        ctx: &OpContext,
        key: &str,
        data: &str,
        opts: UploadOptions,
    ) -> Result<UploadResult, ProviderError>;

    /// The public URL for `key`.
    fn public_url(&self, key: &str) -> String;

    /// Remove an object.
    async fn delete_object(&self, ctx: &OpContext, key: &str) -> Result<(), ProviderError>;

    /// Fetch object metadata.
    async fn object_info(&self, ctx: &OpContext, key: &str) -> Result<ObjectInfo, ProviderError>;

    /// Verify connectivity and bucket access.
    async fn health_check(&self, ctx: &OpContext) -> Result<(), ProviderError>;
}
