use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::errors::ServiceError;
use crate::storefront::StorefrontError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl From<&SyncConfig> for RetryConfig {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            max_attempts: cfg.retry_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.retry_backoff_ms),
            ..Default::default()
        }
    }
}

/// Decides whether an error is worth another attempt
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries rate limits, 5xx and network failures from the storefront
pub struct StorefrontRetryPolicy;

impl RetryPolicy<StorefrontError> for StorefrontRetryPolicy {
    fn is_retryable(&self, error: &StorefrontError) -> bool {
        error.is_transient()
    }
}

/// Retries whatever the service layer classifies as retryable
pub struct ServiceRetryPolicy;

impl RetryPolicy<ServiceError> for ServiceRetryPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_retryable()
    }
}

/// Execute an async function with retries and exponential backoff
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    warn!("Operation failed after {} attempts: {}", attempts, error);
                    return Err(error);
                }

                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, delay
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), StorefrontRetryPolicy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorefrontError::Transient("429".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), StorefrontRetryPolicy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorefrontError::Api {
                status: 404,
                message: "missing".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), ServiceRetryPolicy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::TransientUpstream("timeout".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
