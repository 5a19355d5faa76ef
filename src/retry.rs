//! Bounded retry with a fixed delay for the query stage

use std::future::Future;
use std::time::Duration;

/// Retry policy for language model queries
///
/// Controls how many times a failed request is attempted and how long to
/// wait between attempts. The delay is flat: this is a single-device,
/// low-QPS client, so there is no exponential growth or jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts (the first try counts as one)
    pub max_attempts: u32,
    /// Delay between failed attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping `policy.delay`
/// between failures.
///
/// Returns the first success immediately; no further attempts are made
/// after one. On exhaustion the last error is returned.
///
/// # Errors
///
/// Returns the final attempt's error after all attempts fail.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, max = attempts, error = %e, "attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    // attempts >= 1, so at least one error was recorded
    Err(last_err.expect("no attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(&quick_policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_after_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(&quick_policy(3), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(&quick_policy(3), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("failure {attempt}")) }
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), String> =
            with_retry(&quick_policy(3), |_| async { Err("nope".to_string()) }).await;

        // Two sleeps between three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(&quick_policy(0), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("bad".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }
}
