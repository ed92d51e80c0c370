//! Retry with exponential backoff and jitter
//!
//! A transfer attempt is retried with a freshly prepared status, so only the
//! error decides whether another attempt is made.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Category, Error, Result};

/// Retry a fallible async operation with exponential backoff
///
/// # Example
/// ```ignore
/// let listing = retry_with_backoff(
///     &config,
///     || session.list(&directory),
///     is_retryable_error,
/// ).await;
/// ```
pub async fn retry_with_backoff<T, F, Fut, R>(
    config: &RetryConfig,
    operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    retry_until_canceled(config, &CancellationToken::new(), operation, is_retryable).await
}

/// Like [`retry_with_backoff`], giving up as soon as `cancel` fires
///
/// A cancellation during the backoff sleep ends the loop with
/// [`Error::canceled`] instead of starting another attempt.
pub async fn retry_until_canceled<T, F, Fut, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        if attempt >= config.max_attempts.max(1) || !is_retryable(&e) {
            return Err(e);
        }

        let backoff = calculate_backoff(config, attempt);
        tracing::debug!(
            attempt,
            backoff_ms = backoff.as_millis(),
            error = %e,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::canceled()),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Backoff before the attempt after `attempt`, doubling up to the cap
fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let doubled = config
        .initial_backoff_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped_ms = doubled.min(config.max_backoff_ms);
    Duration::from_millis(capped_ms + rand_jitter(capped_ms))
}

/// Pseudo-random jitter in `0..max` from the clock
fn rand_jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Whether an error is transient
///
/// Connection failures are retried. Cancellation never is, nor anything the
/// backend refused on purpose.
pub fn is_retryable_error(error: &Error) -> bool {
    if error.is_canceled() {
        return false;
    }
    match error.category() {
        Category::Connection => true,
        Category::Unknown => {
            let detail = error.detail().to_lowercase();
            detail.contains("timeout") || detail.contains("temporary")
        }
        Category::NotFound
        | Category::AccessDenied
        | Category::Interrupted
        | Category::Unsupported
        | Category::Config => false,
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    /// Single attempt, no retries
    pub fn disabled(self) -> Self {
        self.max_attempts(1)
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryBuilder::new()
            .max_attempts(max_attempts)
            .initial_backoff_ms(1)
            .max_backoff_ms(10)
            .build()
    }

    #[test]
    fn test_backoff_doubles() {
        let config = RetryConfig::default();
        let b1 = calculate_backoff(&config, 1).as_millis();
        let b2 = calculate_backoff(&config, 2).as_millis();
        let b3 = calculate_backoff(&config, 3).as_millis();
        assert!((100..200).contains(&b1));
        assert!((200..400).contains(&b2));
        assert!((400..800).contains(&b3));
    }

    #[test]
    fn test_backoff_cap() {
        let config = RetryBuilder::new()
            .max_attempts(10)
            .initial_backoff_ms(1000)
            .max_backoff_ms(5000)
            .build();
        // Cap plus at most the same again in jitter
        assert!(calculate_backoff(&config, 10).as_millis() < 10000);
        assert!(calculate_backoff(&config, 64).as_millis() < 10000);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::connection("connection reset")));
        assert!(is_retryable_error(&Error::unknown("temporary failure")));
        assert!(!is_retryable_error(&Error::unknown("bad checksum")));

        assert!(!is_retryable_error(&Error::access_denied("/private")));
        assert!(!is_retryable_error(&Error::not_found("/missing")));
        assert!(!is_retryable_error(&Error::interrupted("quota exceeded")));
        assert!(!is_retryable_error(&Error::canceled()));
    }

    #[test]
    fn test_retry_builder() {
        let config = RetryBuilder::new()
            .max_attempts(4)
            .initial_backoff_ms(250)
            .max_backoff_ms(8000)
            .build();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.initial_backoff_ms, 250);
        assert_eq!(config.max_backoff_ms, 8000);
        assert_eq!(RetryBuilder::new().disabled().build().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &fast(3),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::connection("timeout"))
                    } else {
                        Ok(42)
                    }
                }
            },
            is_retryable_error,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(
            &fast(2),
            || {
                calls += 1;
                async { Err(Error::connection("always fails")) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err().category(), Category::Connection);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_not_found_is_final() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(
            &fast(3),
            || {
                calls += 1;
                async { Err(Error::not_found("/missing")) }
            },
            is_retryable_error,
        )
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let config = RetryBuilder::new()
            .max_attempts(5)
            .initial_backoff_ms(60_000)
            .max_backoff_ms(60_000)
            .build();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = retry_until_canceled(
            &config,
            &cancel,
            || async { Err(Error::connection("reset")) },
            is_retryable_error,
        )
        .await;
        assert!(result.unwrap_err().is_canceled());
    }
}
