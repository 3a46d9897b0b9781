//! Upload sources: seekable bodies can be rewound for retries,
//! forward-only streams get exactly one attempt.

use std::io::{Cursor, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};

/// A source that can be re-read from the start.
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

/// A forward-only source.
pub trait StreamSource: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> StreamSource for T {}

/// The body of an upload.
///
/// Retry-on-transient-failure requires rewinding the source; callers
/// that need retry semantics must hand over a seekable body (in-memory
/// payloads via [`UploadBody::from_bytes`] already are).
pub enum UploadBody {
    Seekable(Box<dyn SeekableSource>),
    Stream(Box<dyn StreamSource>),
}

impl UploadBody {
    /// An in-memory, seekable body.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::Seekable(Box::new(Cursor::new(bytes)))
    }

    /// Wrap a seekable reader.
    pub fn seekable(source: impl SeekableSource + 'static) -> Self {
        Self::Seekable(Box::new(source))
    }

    /// Wrap a forward-only reader.
    pub fn stream(source: impl StreamSource + 'static) -> Self {
        Self::Stream(Box::new(source))
    }

    /// Whether the body supports rewinding.
    pub fn is_seekable(&self) -> bool {
        matches!(self, Self::Seekable(_))
    }

    /// Rewind to the start. Returns `Ok(false)` for forward-only
    /// bodies.
    pub async fn rewind(&mut self) -> std::io::Result<bool> {
        match self {
            Self::Seekable(source) => {
                source.seek(SeekFrom::Start(0)).await?;
                Ok(true)
            }
            Self::Stream(_) => Ok(false),
        }
    }
}

impl AsyncRead for UploadBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Seekable(source) => Pin::new(source).poll_read(cx, buf),
            Self::Stream(source) => Pin::new(source).poll_read(cx, buf),
        }
    }
}

impl std::fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seekable(_) => f.write_str("UploadBody::Seekable"),
            Self::Stream(_) => f.write_str("UploadBody::Stream"),
        }
    }
}
