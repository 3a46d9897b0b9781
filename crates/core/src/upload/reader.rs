//! Progress-counting reader wrappers.
//!
//! The wrapper reports what the provider actually consumed, so the
//! record reflects real transfer progress, not what the caller handed
//! over. Seeks reset the counter to the new position, which keeps
//! retry rewinds honest.

use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::provider::{ProgressFn, UploadBody};

pub(crate) struct CountingReader<R> {
    inner: R,
    read: u64,
    total: u64,
    callback: ProgressFn,
}

impl<R> CountingReader<R> {
    fn new(inner: R, total: u64, callback: ProgressFn) -> Self {
        Self {
            inner,
            read: 0,
            total,
            callback,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n > 0 {
                    me.read += n as u64;
                    (me.callback)(me.read, me.total);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> AsyncSeek for CountingReader<R> {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.get_mut().inner).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        let me = self.get_mut();
        match Pin::new(&mut me.inner).poll_complete(cx) {
            Poll::Ready(Ok(position)) => {
                me.read = position;
                (me.callback)(me.read, me.total);
                Poll::Ready(Ok(position))
            }
            other => other,
        }
    }
}

/// Wrap an upload body so reads (and seeks, when supported) drive the
/// progress callback.
pub(crate) fn wrap_body(body: UploadBody, total: u64, callback: ProgressFn) -> UploadBody {
    match body {
        UploadBody::Seekable(inner) => {
            UploadBody::Seekable(Box::new(CountingReader::new(inner, total, callback)))
        }
        UploadBody::Stream(inner) => {
            UploadBody::Stream(Box::new(CountingReader::new(inner, total, callback)))
        }
    }
}
