//! Exponential-backoff retry executor for single network calls.
//!
//! This policy is orthogonal to the session-level retry counter: [`with_retry`]
//! re-runs one RPC operation a few times when the failure is transient, while
//! [`crate::session::SessionManager::retry_payment`] restarts a whole payment flow.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::PaymentError;
use crate::types::SessionId;

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "retry_defaults::max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "retry_defaults::initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Multiplier applied per attempt.
    #[serde(default = "retry_defaults::backoff_factor")]
    pub backoff_factor: f64,
    /// Ceiling on the computed delay, in milliseconds.
    #[serde(default = "retry_defaults::max_delay_ms")]
    pub max_delay_ms: u64,
}

mod retry_defaults {
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn initial_delay_ms() -> u64 {
        1_000
    }
    pub fn backoff_factor() -> f64 {
        2.0
    }
    pub fn max_delay_ms() -> u64 {
        30_000
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry_defaults::max_attempts(),
            initial_delay_ms: retry_defaults::initial_delay_ms(),
            backoff_factor: retry_defaults::backoff_factor(),
            max_delay_ms: retry_defaults::max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based attempt's successor:
    /// `min(initial * factor^(attempt-1), max)`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Runs `operation`, retrying on transient failures with exponential backoff.
///
/// Only errors with [`PaymentError::is_retryable`] set (network and timeout kinds)
/// consume a retry; any other failure is returned immediately. Exhausting
/// `max_attempts` returns the last classified error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    session_id: Option<&SessionId>,
    mut operation: F,
) -> Result<T, PaymentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PaymentError>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    session_id = session_id.map(|id| id.as_str()),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 10,
            backoff_factor: 2.0,
            max_delay_ms: 40,
        }
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 500,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry(&fast_policy(), None, move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PaymentError::Network("connection reset".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&fast_policy(), None, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PaymentError::InsufficientFunds("1 < 2".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(PaymentError::InsufficientFunds(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&fast_policy(), None, move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(PaymentError::Timeout(format!("attempt {n}")))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(PaymentError::Timeout(message)) => assert_eq!(message, "attempt 2"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
