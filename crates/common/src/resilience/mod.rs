//! Retry and per-backend concurrency limiting
//!
//! Idempotent backend reads are retried with exponential backoff. Every
//! backend call goes through a [`BackendPool`], which bounds in-flight
//! requests with a semaphore and, when configured, paces them with a
//! token-bucket rate limiter.

use crate::config::{BackendConfig, RetryConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Exponential backoff policy for idempotent reads
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// Only errors reporting [`AppError::is_retryable`] are retried.
pub async fn retry_idempotent<T, F, Fut>(policy: &RetryPolicy, operation: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.max_attempts;

    retry(policy.backoff(), || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Request failed, retrying"
                    );
                    metrics::record_retry(operation);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

/// Bounded access to one backend
pub struct BackendPool {
    backend: String,
    permits: Arc<Semaphore>,
    limiter: Option<DefaultDirectRateLimiter>,
    timeout: Duration,
}

impl BackendPool {
    pub fn new(backend: impl Into<String>, max_concurrency: usize, requests_per_second: Option<u32>, timeout: Duration) -> Self {
        let limiter = requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Self {
            backend: backend.into(),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            limiter,
            timeout,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            config.id.clone(),
            config.max_concurrency,
            config.requests_per_second,
            config.timeout(),
        )
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Free permits right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run one backend call: wait for a permit, then for the rate limiter,
    /// then give the call `timeout` to finish
    pub async fn run<T, Fut>(&self, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::unavailable(&self.backend, "connection pool closed"))?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::unavailable(
                &self.backend,
                format!("call timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = AtomicUsize::new(0);
        let result = retry_idempotent(&fast_policy(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::unavailable("cs", "503"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_idempotent(&fast_policy(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::unavailable("cs", "503")) }
        })
        .await;
        assert!(matches!(result, Err(AppError::BackendUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_forbidden() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_idempotent(&fast_policy(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::forbidden("cs", "denied")) }
        })
        .await;
        assert!(matches!(result, Err(AppError::Forbidden { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pool_times_out_slow_calls() {
        let pool = BackendPool::new("slow", 1, None, Duration::from_millis(20));
        let result: Result<()> = pool
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = Arc::new(BackendPool::new("bounded", 2, None, Duration::from_secs(1)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }
}
