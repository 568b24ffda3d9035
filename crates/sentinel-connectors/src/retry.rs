//! Retry and rate-limiting utilities for connector API calls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use sentinel_core::SentinelError;

use crate::config::{RateLimitConfig, RetryConfig};

/// Execute an async operation with exponential backoff.
///
/// Only transient errors (network, 5xx, 429, timeout) are retried; a 429
/// with a server-provided `Retry-After` stretches the delay to honor it.
/// Everything else is terminal and returned as-is.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    op: &str,
    mut f: F,
) -> Result<T, SentinelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SentinelError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let mut delay = config.delay_for_attempt(attempt);
                if let SentinelError::RateLimited {
                    retry_after_secs: Some(secs),
                } = &e
                {
                    delay = delay.max(Duration::from_secs(*secs));
                }
                tracing::warn!(
                    op,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Token-bucket rate limiter: `burst` capacity refilled at `rps`.
///
/// One limiter per external source, shared process-wide.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    rps: f64,
    burst: f64,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let burst = (config.burst.max(1)) as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
            rps: config.rps.max(0.001),
            burst,
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rps).min(self.burst);
                state.refilled_at = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rps))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Sliding-window limiter for sources that meter requests per window
/// (the NVD regime: N requests per 30 seconds).
pub struct WindowLimiter {
    window: Duration,
    max_calls: usize,
    calls: Mutex<Vec<Instant>>,
}

impl WindowLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            window,
            max_calls: max_calls.max(1),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                calls.retain(|t| now.duration_since(*t) < self.window);
                if calls.len() < self.max_calls {
                    calls.push(now);
                    None
                } else {
                    let oldest = calls[0];
                    Some(self.window.saturating_sub(now.duration_since(oldest)))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay + Duration::from_millis(50)).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            cap_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_retry(5), "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SentinelError::Transient("flaky".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(5), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(SentinelError::Config("bad".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(SentinelError::Config(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(3), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(SentinelError::Transient("still down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(SentinelError::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_delays_past_burst() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            rps: 10.0,
            burst: 2,
        });

        // Burst passes immediately.
        limiter.acquire().await;
        limiter.acquire().await;

        // The third call needs a refill (~100ms at 10 rps); with the
        // paused clock, sleeping is the only way time advances.
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test(start_paused = true)]
    async fn window_limiter_blocks_at_capacity() {
        let limiter = WindowLimiter::new(2, Duration::from_secs(30));
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(29));
    }
}
