//! Bounded exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Retry policy with exponential backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling applied to the growing delay.
    pub max_delay: Duration,
    /// Factor the delay grows by after each attempt.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Policy used for tagging freshly copied images: the provider can take
    /// a while to propagate permissions on a brand-new resource, so tag
    /// creation is retried for roughly two and a half minutes.
    #[must_use]
    pub const fn tagging() -> Self {
        Self {
            max_attempts: 11,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.mul_f64(self.backoff_multiplier.powi(exponent));
        raw.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Runs `operation` until it succeeds, fails non-retryably, or exhausts the
/// configured attempts.
///
/// `should_retry` classifies an error as transient. The final error is
/// returned unchanged once attempts run out.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub async fn retry<T, E, F, Fut, P>(
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= attempts || !should_retry(&err) {
                    return Err(err);
                }
                sleep(config.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = retry(&fast_policy(5), |_| true, || {
            let seen = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if seen < 3 {
                    Err("transient")
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn gives_up_when_attempts_run_out() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(&fast_policy(3), |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still broken") }
        })
        .await;

        assert_eq!(result, Err("still broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(&fast_policy(5), |err| *err == "transient", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        })
        .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let config = RetryConfig::tagging();
        assert_eq!(config.delay_for(0), Duration::from_millis(200));
        assert_eq!(config.delay_for(1), Duration::from_millis(400));
        assert_eq!(config.delay_for(4), Duration::from_millis(3200));
        assert_eq!(config.delay_for(10), Duration::from_secs(30));
    }
}
