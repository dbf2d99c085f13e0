//! Clock abstraction, retry with exponential backoff, and request pacing.
//!
//! Every wait in the pipeline (inter-call delays, retry backoff, connector
//! pacing, the overall deadline) goes through [`Clock`], so tests can drive
//! the pipeline with [`ManualClock`] and never sleep for real.

use crate::config::RetryConfig;
use crate::error::{OracleError, SourceError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source of time for the pipeline.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test clock: sleeping advances virtual time instantly and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        // Yield first so a sleep that loses a race is never recorded.
        tokio::task::yield_now().await;
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

/// Run `fut` for at most `limit` of `clock` time. `None` means it timed out.
pub async fn timeout<F: Future>(clock: &dyn Clock, limit: Duration, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        output = fut => Some(output),
        _ = clock.sleep(limit) => None,
    }
}

/// Time left before `deadline`, or `None` when there is no deadline.
pub fn remaining(clock: &dyn Clock, deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(clock.now()))
}

/// Errors the retry loop knows how to classify.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        SourceError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs().map(Duration::from_secs)
    }
}

impl Retryable for OracleError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::RateLimited { .. } | OracleError::Timeout { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            OracleError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt + 1`: base * 2^attempt, capped,
    /// but never shorter than what the upstream asked for.
    pub fn delay_for(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        let backoff = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        match retry_after {
            Some(wait) => backoff.max(wait),
            None => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Run `op`, retrying transient errors with backoff.
///
/// Non-transient errors return immediately. Cancellation during a backoff
/// wait returns the last error without another attempt, and so does a
/// backoff (including an upstream `Retry-After`) that would end past
/// `deadline`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    clock: &dyn Clock,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let wait = policy.delay_for(attempt, e.retry_after());
                if let Some(left) = remaining(clock, deadline)
                    && wait > left
                {
                    warn!(
                        backoff_ms = wait.as_millis() as u64,
                        remaining_ms = left.as_millis() as u64,
                        error = %e,
                        "Backoff would pass the deadline, giving up"
                    );
                    return Err(e);
                }
                info!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = clock.sleep(wait) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Enforces a minimum interval between requests to one upstream service.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            last_request: tokio::sync::Mutex::new(None),
            clock,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request may be sent, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                self.clock.sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(self.clock.now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    fn timeout_err() -> SourceError {
        SourceError::Timeout {
            source_name: "pubmed".into(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_delay_for_backoff_is_capped() {
        let p = policy(5);
        assert_eq!(p.delay_for(0, None), Duration::from_secs(1));
        assert_eq!(p.delay_for(1, None), Duration::from_secs(2));
        assert_eq!(p.delay_for(2, None), Duration::from_secs(4));
        assert_eq!(p.delay_for(5, None), Duration::from_secs(8));
        assert_eq!(p.delay_for(60, None), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_respects_retry_after() {
        let p = policy(3);
        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let clock = ManualClock::new();
        let calls = AtomicUsize::new(0);
        let result: Result<&str, SourceError> =
            retry_with_backoff(&clock, &policy(3), &CancellationToken::new(), None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(timeout_err()) } else { Ok("ok") } }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let clock = ManualClock::new();
        let calls = AtomicUsize::new(0);
        let result: Result<(), SourceError> =
            retry_with_backoff(&clock, &policy(2), &CancellationToken::new(), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout_err()) }
            })
            .await;
        assert!(matches!(result, Err(SourceError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let clock = ManualClock::new();
        let calls = AtomicUsize::new(0);
        let result: Result<(), SourceError> =
            retry_with_backoff(&clock, &policy(3), &CancellationToken::new(), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SourceError::Http {
                        source_name: "pubmed".into(),
                        status: 400,
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_retrying() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);
        let result: Result<(), SourceError> =
            retry_with_backoff(&clock, &policy(3), &cancel, None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout_err()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_past_deadline_is_not_waited() {
        let clock = ManualClock::new();
        let start = clock.now();
        let deadline = start + Duration::from_secs(180);
        let calls = AtomicUsize::new(0);
        let result: Result<(), SourceError> = retry_with_backoff(
            &clock,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            Some(deadline),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SourceError::RateLimited {
                        source_name: "pubmed".into(),
                        retry_after_secs: 3600,
                    })
                }
            },
        )
        .await;
        assert!(matches!(result, Err(SourceError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
        assert!(clock.now() <= deadline);
    }

    #[tokio::test]
    async fn test_backoff_within_deadline_still_retries() {
        let clock = ManualClock::new();
        let deadline = clock.now() + Duration::from_secs(10);
        let calls = AtomicUsize::new(0);
        let result: Result<&str, SourceError> =
            retry_with_backoff(&clock, &policy(3), &CancellationToken::new(), Some(deadline), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 1 { Err(timeout_err()) } else { Ok("ok") } }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_timeout_on_manual_clock() {
        let clock = ManualClock::new();
        let start = clock.now();
        let out = timeout(&clock, Duration::from_secs(20), std::future::pending::<()>()).await;
        assert!(out.is_none());
        assert_eq!(clock.now() - start, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_timeout_ready_future_records_no_sleep() {
        let clock = ManualClock::new();
        let out = timeout(&clock, Duration::from_secs(20), async { 7 }).await;
        assert_eq!(out, Some(7));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(Duration::from_millis(500), clock.clone());
        limiter.acquire().await;
        limiter.acquire().await;
        clock.advance(Duration::from_millis(200));
        limiter.acquire().await;
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(300)]
        );
    }

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(2)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(2));
        assert_eq!(clock.total_slept(), Duration::from_secs(2));
    }
}
