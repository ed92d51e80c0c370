//! Bandwidth throttle shared by concurrent copiers

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Bucket {
    /// Bytes that may pass without waiting, negative when in debt
    available: f64,
    refilled: Instant,
}

struct ThrottleState {
    rate: u64,
    bucket: Mutex<Bucket>,
    shutdown: CancellationToken,
}

/// Handle to a token-bucket rate limiter
///
/// Every clone draws from the same bucket, so the limit caps the aggregate
/// throughput of all copiers holding the handle. The bucket holds at most
/// one second worth of bytes.
#[derive(Clone, Default)]
pub struct BandwidthThrottle {
    state: Option<Arc<ThrottleState>>,
}

impl BandwidthThrottle {
    /// Throttle that never delays
    pub fn unlimited() -> Self {
        Self { state: None }
    }

    /// Cap throughput at `bytes_per_second`, zero means unlimited
    pub fn new(bytes_per_second: u64) -> Self {
        if bytes_per_second == 0 {
            return Self::unlimited();
        }
        Self {
            state: Some(Arc::new(ThrottleState {
                rate: bytes_per_second,
                bucket: Mutex::new(Bucket {
                    available: bytes_per_second as f64,
                    refilled: Instant::now(),
                }),
                shutdown: CancellationToken::new(),
            })),
        }
    }

    pub fn rate(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.rate)
    }

    pub fn is_unlimited(&self) -> bool {
        self.state.is_none()
    }

    /// Wait until `bytes` may pass
    pub async fn acquire(&self, bytes: u64) {
        let Some(state) = &self.state else {
            return;
        };
        if state.shutdown.is_cancelled() {
            return;
        }
        let wait = {
            let mut bucket = state.bucket.lock();
            let now = Instant::now();
            let rate = state.rate as f64;
            let elapsed = now.duration_since(bucket.refilled).as_secs_f64();
            bucket.available = (bucket.available + elapsed * rate).min(rate);
            bucket.refilled = now;
            bucket.available -= bytes as f64;
            if bucket.available >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.available / rate)
            }
        };
        if wait.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = state.shutdown.cancelled() => {}
        }
    }

    /// Release current and future waiters
    pub fn shutdown(&self) {
        if let Some(state) = &self.state {
            state.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for BandwidthThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthThrottle")
            .field("rate", &self.rate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_waits() {
        let throttle = BandwidthThrottle::unlimited();
        let start = Instant::now();
        throttle.acquire(u64::MAX / 2).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(BandwidthThrottle::new(0).is_unlimited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait() {
        let throttle = BandwidthThrottle::new(1000);
        let start = Instant::now();
        throttle.acquire(1000).await;
        assert!(start.elapsed() < Duration::from_millis(10));

        throttle.acquire(500).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(490), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_bucket() {
        let throttle = BandwidthThrottle::new(1000);
        let other = throttle.clone();
        let start = Instant::now();
        throttle.acquire(1000).await;
        other.acquire(1000).await;
        assert!(start.elapsed() >= Duration::from_millis(990));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let throttle = BandwidthThrottle::new(1);
        throttle.acquire(1).await;

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.acquire(1_000_000).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        throttle.shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
        // Later callers pass straight through
        throttle.acquire(1_000_000).await;
    }
}
