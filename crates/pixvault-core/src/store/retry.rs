//! Bounded retry for transient storage failures.
//!
//! Store calls that fail with a retryable error are attempted again with
//! exponential backoff plus jitter. Anything else is returned immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::StoreError;

/// How many times, and how patiently, to retry a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay_ms: config.retry_delay_ms,
        }
    }
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(30_000))
}

/// Backoff plus up to 25% random jitter, so concurrent tasks hitting the
/// same outage do not retry in lockstep.
fn jittered(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = backoff_duration(attempt, base_delay_ms);
    let spread = delay.as_millis() as u64 / 4;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op_name: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.attempts => {
                let delay = jittered(attempt, policy.base_delay_ms);
                tracing::debug!(
                    "Retry {}/{} for {op_name} after {delay:?}: {e}",
                    attempt + 1,
                    policy.attempts - 1
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!("{op_name} failed after {} attempts: {e}", attempt + 1);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn test_backoff_exponential() {
        assert_eq!(backoff_duration(0, 1000), Duration::from_millis(1000));
        assert_eq!(backoff_duration(1, 1000), Duration::from_millis(2000));
        assert_eq!(backoff_duration(2, 1000), Duration::from_millis(4000));
        assert_eq!(backoff_duration(3, 1000), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_capped_at_30s() {
        assert_eq!(backoff_duration(10, 1000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        for _ in 0..50 {
            let d = jittered(2, 100);
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&PipelineConfig::default());
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.base_delay_ms, 200);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(fast_policy(3), "create_image", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Unavailable("flaky".into()))
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
    async fn test_retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(fast_policy(3), "create_image", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Unavailable("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let calls = AtomicU32::new(0);
        let existing = ImageId::new();
        let result: Result<(), _> = with_retry(fast_policy(3), "create_image", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(StoreError::DuplicateFingerprint { existing }) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::DuplicateFingerprint { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
