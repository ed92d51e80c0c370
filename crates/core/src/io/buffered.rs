//! Write streams committed on shutdown

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::mapping::into_io_error;

/// `bytes` written over `existing` at `position`, keeping any tail beyond
pub fn splice(existing: &[u8], position: usize, bytes: &[u8]) -> Vec<u8> {
    let mut data = existing[..position.min(existing.len())].to_vec();
    data.extend_from_slice(bytes);
    if existing.len() > data.len() {
        data.extend_from_slice(&existing[data.len()..]);
    }
    data
}

/// Commit step run with the buffered bytes when the stream is shut down
pub type Commit = Box<dyn FnOnce(Vec<u8>) -> BoxFuture<'static, Result<()>> + Send>;

/// Buffers every byte in memory and hands them to a commit future on
/// `shutdown()`
///
/// Whole-object backends use this to splice ranged writes into the existing
/// object and replace it in one step. Dropping the stream before shutdown
/// discards the buffer and leaves the destination untouched.
pub struct BufferedWriteStream {
    buffer: Vec<u8>,
    commit: Option<Commit>,
    pending: Option<BoxFuture<'static, Result<()>>>,
}

impl BufferedWriteStream {
    pub fn new(commit: Commit) -> Self {
        Self {
            buffer: Vec::new(),
            commit: Some(commit),
            pending: None,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "write stream already closed")
}

impl AsyncWrite for BufferedWriteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.commit.is_none() {
            return Poll::Ready(Err(closed()));
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pending.is_none() {
            let Some(commit) = this.commit.take() else {
                return Poll::Ready(Ok(()));
            };
            this.pending = Some(commit(std::mem::take(&mut this.buffer)));
        }
        let Some(pending) = this.pending.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match pending.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.pending = None;
                Poll::Ready(result.map_err(into_io_error))
            }
        }
    }
}

/// Wraps a native write stream and runs `on_close` once it shut down cleanly
pub struct ClosingWriteStream<W> {
    inner: W,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl<W> ClosingWriteStream<W> {
    pub fn new(inner: W, on_close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner,
            on_close: Some(Box::new(on_close)),
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ClosingWriteStream<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_shutdown(cx) {
            Poll::Ready(Ok(())) => {
                if let Some(on_close) = this.on_close.take() {
                    on_close();
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
