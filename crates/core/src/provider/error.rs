//! Provider error taxonomy with retry classification.

use thiserror::Error;

use crate::context::ContextError;
use crate::encoding::PayloadError;

/// Errors produced by storage providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    // Configuration errors (permanent).
    #[error("invalid or unsupported S3 provider: {0}")]
    InvalidProvider(String),

    #[error("S3 endpoint is required")]
    MissingEndpoint,

    #[error("S3 bucket name is required")]
    MissingBucket,

    #[error("S3 access key is required")]
    MissingAccessKey,

    #[error("S3 secret key is required")]
    MissingSecretKey,

    #[error("S3 region is required for {0} provider")]
    MissingRegion(String),

    #[error("invalid {0} endpoint: {1}")]
    InvalidEndpoint(String, String),

    // Payload errors (permanent).
    #[error("invalid base64 data: {0}")]
    InvalidBase64(#[from] PayloadError),

    #[error("invalid or unsupported content type: {0}")]
    InvalidContentType(String),

    #[error("file is empty")]
    EmptyFile,

    #[error("file size exceeds maximum allowed: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    // Remote-side errors.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("S3 bucket not found")]
    BucketNotFound,

    #[error("S3 authentication failed")]
    AuthenticationFailed,

    #[error("insufficient permissions for S3 operation")]
    PermissionDenied,

    #[error("http status {status}")]
    HttpStatus { status: u16 },

    // Transient transport conditions.
    #[error("operation timed out")]
    Timeout,

    #[error("network error during S3 operation: {0}")]
    Network(String),

    #[error("operation cancelled")]
    Cancelled,

    /// Retry was required but the upload source cannot be rewound.
    #[error("reader is not seekable; cannot retry upload")]
    NotRewindable,

    #[error("S3 service is disabled")]
    Disabled,

    #[error("S3 provider not initialized")]
    NotInitialized,

    /// Context wrapper carrying provider, operation and key labels.
    #[error("S3 {provider} {operation} failed for key '{key}': {source}")]
    Operation {
        provider: String,
        operation: String,
        key: String,
        status: Option<u16>,
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Wrap an error with provider/operation/key context.
    pub fn operation(
        provider: impl Into<String>,
        operation: impl Into<String>,
        key: impl Into<String>,
        source: ProviderError,
    ) -> Self {
        let status = source.status_code();
        Self::Operation {
            provider: provider.into(),
            operation: operation.into(),
            key: key.into(),
            status,
            source: Box::new(source),
        }
    }

    /// The HTTP-like status code carried anywhere in the chain.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status } => Some(*status),
            Self::Operation { status, source, .. } => status.or_else(|| source.status_code()),
            _ => None,
        }
    }

    /// Whether a retry may help: timeouts, network errors and status
    /// codes 408, 429 and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::HttpStatus { status } => retryable_status(*status),
            Self::Operation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the failure is permanent: configuration and auth
    /// problems, invalid payloads, and non-retryable 4xx codes.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidProvider(_)
            | Self::MissingEndpoint
            | Self::MissingBucket
            | Self::MissingAccessKey
            | Self::MissingSecretKey
            | Self::MissingRegion(_)
            | Self::InvalidEndpoint(_, _)
            | Self::InvalidBase64(_)
            | Self::InvalidContentType(_)
            | Self::AuthenticationFailed
            | Self::PermissionDenied => true,
            Self::HttpStatus { status } => {
                (400..500).contains(status) && !retryable_status(*status)
            }
            Self::Operation { source, .. } => source.is_permanent(),
            _ => false,
        }
    }
}

fn retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

impl From<ContextError> for ProviderError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::Timeout,
        }
    }
}
