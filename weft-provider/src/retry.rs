//! Deadline wrapping and bounded-backoff retry for provider calls.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;

/// Retry policy for individual provider calls within a turn.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }
}

/// Run `op` under `policy`, retrying only retryable provider errors.
///
/// Timeouts and parse failures surface immediately: a missed deadline is
/// treated as a cancelled turn, not a transient fault.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = policy.base_delay;
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(attempt, error = %err, "provider call failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop always returns")
}

/// Run `fut` under an optional deadline, mapping a miss to
/// [`ProviderError::Timeout`].
pub async fn with_deadline<T, Fut>(
    deadline: Option<Duration>,
    fut: Fut,
) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };

        let result: Result<u32, _> = retry_with_backoff(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Provider("flaky".into()))
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
    async fn timeout_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        };

        let result: Result<(), _> = retry_with_backoff(policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Timeout) }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_miss_maps_to_timeout() {
        let result: Result<(), _> = with_deadline(Some(Duration::from_millis(5)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout)));
    }
}
