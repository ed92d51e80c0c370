//! Stream copier honoring offset, limit, throttle and cancellation

use std::future::Future;
use std::io::SeekFrom;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::io::throttle::BandwidthThrottle;
use crate::status::TransferStatus;

/// Default chunk size of a copy
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Progress sink for bytes moving through a copier
pub trait StreamListener: Send + Sync {
    /// `bytes` were read from the input
    fn recv(&self, _bytes: u64) {}

    /// `bytes` were written to the output
    fn sent(&self, _bytes: u64) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStreamListener;

impl StreamListener for DisabledStreamListener {}

/// Copies bytes between two streams
///
/// Neither stream is closed: the output is flushed and the caller decides
/// whether to commit it with `shutdown()`.
pub struct StreamCopier<'a> {
    status: &'a TransferStatus,
    listener: &'a dyn StreamListener,
    offset: u64,
    limit: Option<u64>,
    throttle: BandwidthThrottle,
    chunk_size: usize,
}

impl<'a> StreamCopier<'a> {
    pub fn new(status: &'a TransferStatus, listener: &'a dyn StreamListener) -> Self {
        Self {
            status,
            listener,
            offset: 0,
            limit: None,
            throttle: BandwidthThrottle::unlimited(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Position the input at byte `offset` before copying
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Copy exactly `limit` bytes, without a limit copy to end of stream
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_throttle(mut self, throttle: BandwidthThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Copy from a forward-only input, discarding the first `offset` bytes
    pub async fn transfer<R, W>(&self, input: &mut R, output: &mut W) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.discard(input).await?;
        self.copy(input, output).await
    }

    /// Copy from a seekable input, seeking to `offset` first
    pub async fn transfer_seekable<R, W>(&self, input: &mut R, output: &mut W) -> Result<u64>
    where
        R: AsyncRead + AsyncSeek + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.offset > 0 {
            self.guard(input.seek(SeekFrom::Start(self.offset))).await?;
        }
        self.copy(input, output).await
    }

    async fn discard<R>(&self, input: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut remaining = self.offset;
        if remaining == 0 {
            return Ok(());
        }
        let mut buf = vec![0u8; self.chunk_size];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.guard(input.read(&mut buf[..want])).await?;
            if n == 0 {
                return Err(Error::interrupted(format!(
                    "Stream ended {remaining} bytes before offset {}",
                    self.offset
                )));
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    async fn copy<R, W>(&self, input: &mut R, output: &mut W) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let want = match self.limit {
                Some(limit) if total >= limit => break,
                Some(limit) => (limit - total).min(buf.len() as u64) as usize,
                None => buf.len(),
            };
            let n = self.guard(input.read(&mut buf[..want])).await?;
            if n == 0 {
                if let Some(limit) = self.limit {
                    return Err(Error::interrupted(format!(
                        "Unexpected end of stream after {total} of {limit} bytes"
                    )));
                }
                break;
            }
            self.listener.recv(n as u64);
            tokio::select! {
                biased;
                _ = self.status.cancelled() => return Err(Error::canceled()),
                _ = self.throttle.acquire(n as u64) => {}
            }
            self.guard(output.write_all(&buf[..n])).await?;
            self.listener.sent(n as u64);
            self.status.add_transferred(n as u64);
            total += n as u64;
        }
        self.guard(output.flush()).await?;
        tracing::debug!(bytes = total, offset = self.offset, "Copy complete");
        Ok(total)
    }

    /// Run one blocking stream call, unwinding when the status is canceled
    async fn guard<T>(&self, call: impl Future<Output = std::io::Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.status.cancelled() => Err(Error::canceled()),
            result = call => result.map_err(Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Category;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        recv: AtomicU64,
        sent: AtomicU64,
    }

    impl StreamListener for Counting {
        fn recv(&self, bytes: u64) {
            self.recv.fetch_add(bytes, Ordering::SeqCst);
        }

        fn sent(&self, bytes: u64) {
            self.sent.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_copy_to_end() {
        let status = TransferStatus::new();
        let listener = Counting::default();
        let data = payload(100_000);
        let mut out = Vec::new();

        let n = StreamCopier::new(&status, &listener)
            .transfer(&mut Cursor::new(data.clone()), &mut out)
            .await
            .unwrap();
        assert_eq!(n, 100_000);
        assert_eq!(out, data);
        assert_eq!(status.transferred(), 100_000);
        assert_eq!(listener.recv.load(Ordering::SeqCst), 100_000);
        assert_eq!(listener.sent.load(Ordering::SeqCst), 100_000);
    }

    #[tokio::test]
    async fn test_limit_stops_early() {
        let status = TransferStatus::new();
        let data = payload(1000);
        let mut out = Vec::new();

        let n = StreamCopier::new(&status, &DisabledStreamListener)
            .with_limit(10)
            .with_chunk_size(3)
            .transfer(&mut Cursor::new(data.clone()), &mut out)
            .await
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, &data[..10]);
    }

    #[tokio::test]
    async fn test_offset_discard_and_seek_agree() {
        let data = payload(5000);
        let status = TransferStatus::new();

        let mut discarded = Vec::new();
        StreamCopier::new(&status, &DisabledStreamListener)
            .with_offset(1234)
            .with_limit(100)
            .transfer(&mut Cursor::new(data.clone()), &mut discarded)
            .await
            .unwrap();

        let mut seeked = Vec::new();
        StreamCopier::new(&status, &DisabledStreamListener)
            .with_offset(1234)
            .with_limit(100)
            .transfer_seekable(&mut Cursor::new(data.clone()), &mut seeked)
            .await
            .unwrap();

        assert_eq!(discarded, &data[1234..1334]);
        assert_eq!(discarded, seeked);
    }

    #[tokio::test]
    async fn test_short_input_is_an_error() {
        let status = TransferStatus::new();
        let mut out = Vec::new();
        let e = StreamCopier::new(&status, &DisabledStreamListener)
            .with_limit(20)
            .transfer(&mut Cursor::new(payload(5)), &mut out)
            .await
            .unwrap_err();
        assert_eq!(e.category(), Category::Interrupted);
        assert!(!e.is_canceled());
    }

    #[tokio::test]
    async fn test_offset_past_end_is_an_error() {
        let status = TransferStatus::new();
        let mut out = Vec::new();
        let e = StreamCopier::new(&status, &DisabledStreamListener)
            .with_offset(10)
            .transfer(&mut Cursor::new(payload(5)), &mut out)
            .await
            .unwrap_err();
        assert_eq!(e.category(), Category::Interrupted);
    }

    #[tokio::test]
    async fn test_zero_limit_copies_nothing() {
        let status = TransferStatus::new();
        let mut out = Vec::new();
        let n = StreamCopier::new(&status, &DisabledStreamListener)
            .with_limit(0)
            .transfer(&mut Cursor::new(Vec::<u8>::new()), &mut out)
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_read() {
        let status = TransferStatus::new();
        // Writer half kept open so the read never completes
        let (mut input, _writer) = tokio::io::duplex(64);
        let token = status.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let mut out = Vec::new();
        let e = StreamCopier::new(&status, &DisabledStreamListener)
            .with_limit(10)
            .transfer(&mut input, &mut out)
            .await
            .unwrap_err();
        assert!(e.is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_copy() {
        let status = TransferStatus::new();
        let throttle = BandwidthThrottle::new(1000);
        let start = tokio::time::Instant::now();
        let mut out = Vec::new();

        StreamCopier::new(&status, &DisabledStreamListener)
            .with_throttle(throttle)
            .with_chunk_size(500)
            .transfer(&mut Cursor::new(payload(3000)), &mut out)
            .await
            .unwrap();
        // One second of burst, two seconds of debt
        assert!(start.elapsed() >= Duration::from_millis(1990));
        assert_eq!(out.len(), 3000);
    }
}
