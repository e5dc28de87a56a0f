//! Retry with exponential backoff for cloud backend calls.

use std::future::Future;
use std::time::Duration;

use stowage_core::RetryConfig;

use crate::traits::{StorageError, StorageResult};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Retry policy applied to every backend call of a cloud driver.
///
/// The delay before retry `n` (0-based) is
/// `min(initial_delay * multiplier^n, max_delay)`. Only errors for which
/// [`StorageError::is_retryable`] holds are retried; anything else is returned
/// on the first failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Defaults with any configured overrides applied.
    pub fn from_config(config: Option<&RetryConfig>) -> Self {
        let defaults = Self::default();
        let Some(config) = config else {
            return defaults;
        };
        Self {
            max_attempts: config.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay: config
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            multiplier: config
                .multiplier
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(defaults.multiplier),
            max_delay: config
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (0 = first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (initial_ms * self.multiplier.powi(retry as i32)).min(max_ms);
        Duration::from_millis(delay_ms as u64)
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// After the last attempt fails the error is wrapped in
    /// [`StorageError::RetriesExhausted`] carrying the attempt count.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "Storage operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "Storage operation failed, retries exhausted"
                    );
                    return Err(StorageError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn http(status: u16) -> StorageError {
        StorageError::Http {
            status,
            message: "simulated".to_string(),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_overrides() {
        let policy = RetryPolicy::from_config(Some(&RetryConfig {
            max_attempts: Some(5),
            initial_delay_ms: Some(100),
            multiplier: None,
            max_delay_ms: Some(250),
        }));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
        assert_eq!(RetryPolicy::from_config(None), RetryPolicy::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_503_with_backoff_then_succeeds() {
        let policy = RetryPolicy::default();
        let mut attempts_at = Vec::new();

        let result = policy
            .run("put", || {
                attempts_at.push(Instant::now());
                let n = attempts_at.len();
                async move {
                    if n < 3 {
                        Err(http(503))
                    } else {
                        Ok("stored")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "stored");
        assert_eq!(attempts_at.len(), 3);
        assert!(attempts_at[1] - attempts_at[0] >= Duration::from_millis(1000));
        assert!(attempts_at[2] - attempts_at[1] >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_is_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;

        let result: StorageResult<()> = policy
            .run("get", || {
                calls += 1;
                async { Err(http(404)) }
            })
            .await;

        assert!(matches!(result, Err(StorageError::Http { status: 404, .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let mut calls = 0;

        let result: StorageResult<()> = policy
            .run("list", || {
                calls += 1;
                async { Err(StorageError::Network("connection reset".to_string())) }
            })
            .await;

        match result {
            Err(StorageError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, StorageError::Network(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls, 2);
    }
}
