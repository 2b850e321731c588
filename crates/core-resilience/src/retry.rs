//! Retry Scheduler: bounded-attempt execution with jittered backoff
//!
//! One backoff formula backs both in-process multi-attempt calls and the
//! message-level redelivery delay computed by the recovery layer:
//!
//! ```text
//! delay(n) = min(base_delay × backoff_multiplier^n, max_delay) ± 10% jitter
//! ```
//!
//! Retryability is decided by the caller's predicate; an explicit
//! non-retryable verdict short-circuits after a single attempt. For raw
//! failures without a typed verdict, [`transient_signature`] matches known
//! transient-infrastructure error text.
//!
//! # Example
//!
//! ```
//! use searchsync_core_resilience::retry::{execute_with_retry, RetryConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = RetryConfig {
//!     max_retries: 2,
//!     base_delay: Duration::from_millis(1),
//!     ..Default::default()
//! };
//!
//! let outcome = execute_with_retry(
//!     || async { Err::<(), _>("connection refused") },
//!     &config,
//!     |_| true,
//! )
//! .await;
//!
//! assert!(!outcome.success());
//! assert_eq!(outcome.attempts, 3); // max_retries + 1
//! # }
//! ```

use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Error-message fragments that identify transient infrastructure failures.
///
/// Evaluated case-insensitively against the raw failure text when no
/// explicit retryable flag is available.
pub const TRANSIENT_SIGNATURES: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "connection error",
    "timeout",
    "timed out",
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "getaddrinfo",
    "dns",
    "socket hang up",
    "temporarily unavailable",
    "service unavailable",
    "broker unavailable",
    "rabbitmq connection",
    "elasticsearch connection",
    "mongodb connection",
    "no living connections",
];

/// Configuration for bounded-attempt retries
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries; total attempts = max_retries + 1
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the computed delay, applied before jitter
    pub max_delay: Duration,
    /// Exponential growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Result of a bounded-attempt execution
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result: the success value or the last error observed
    pub result: Result<T, E>,
    /// Number of attempts actually performed (≥ 1)
    pub attempts: u32,
    /// Total time spent sleeping between attempts
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// True iff the operation eventually succeeded
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Check whether raw failure text matches a known transient signature
pub fn transient_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Compute the delay before retry `attempt` (0-indexed).
///
/// `min(base × multiplier^attempt, max)`, then jittered by ±10% uniformly
/// at random and floored at zero. Pre-jitter the delay is non-decreasing
/// in `attempt` up to the cap.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as f64;
    let cap_ms = config.max_delay.as_millis() as f64;
    let raw_ms = (base_ms * config.backoff_multiplier.powi(attempt as i32)).min(cap_ms);

    let jitter_span = raw_ms * 0.1;
    let jitter = if jitter_span > 0.0 {
        rand::rng().random_range(-jitter_span..=jitter_span)
    } else {
        0.0
    };

    Duration::from_millis((raw_ms + jitter).max(0.0) as u64)
}

/// Execute an operation with bounded retries and jittered backoff.
///
/// Attempts the operation up to `max_retries + 1` times, sleeping
/// [`backoff_delay`] between attempts. The `retryable` predicate is
/// consulted after each failure; a `false` verdict short-circuits
/// immediately, so a non-retryable error costs exactly one attempt.
pub async fn execute_with_retry<F, Fut, T, E>(
    mut op: F,
    config: &RetryConfig,
    retryable: impl Fn(&E) -> bool,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts += 1;

        match op().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    total_delay,
                }
            }
            Err(e) => {
                if attempts > config.max_retries || !retryable(&e) {
                    return RetryOutcome {
                        result: Err(e),
                        attempts,
                        total_delay,
                    };
                }

                let delay = backoff_delay(attempts - 1, config);
                debug!(attempt = attempts, ?delay, error = %e, "retrying after backoff");
                total_delay += delay;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_transient_signatures() {
        assert!(transient_signature("connect ECONNREFUSED 127.0.0.1:9200"));
        assert!(transient_signature("Request timed out after 30000ms"));
        assert!(transient_signature("RabbitMQ connection closed"));
        assert!(transient_signature("No Living connections"));
        assert!(!transient_signature("mapping type is invalid"));
        assert!(!transient_signature("document already exists"));
    }

    #[test]
    fn test_backoff_delay_within_jitter() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        };

        for attempt in 0..5u32 {
            let expected = 1000.0 * 2.0f64.powi(attempt as i32);
            let delay = backoff_delay(attempt, &config).as_millis() as f64;
            assert!(
                delay >= expected * 0.9 - 1.0 && delay <= expected * 1.1 + 1.0,
                "attempt {attempt}: delay {delay} outside ±10% of {expected}"
            );
        }
    }

    #[test]
    fn test_backoff_delay_capped() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 2.0,
        };

        // 1000 * 2^6 = 64000 > cap, so pre-jitter delay is 5000
        let delay = backoff_delay(6, &config).as_millis() as f64;
        assert!((4500.0 - 1.0..=5500.0 + 1.0).contains(&delay));
    }

    #[test]
    fn test_backoff_zero_base() {
        let config = RetryConfig {
            base_delay: Duration::ZERO,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(3, &config), Duration::ZERO);
    }

    #[test]
    fn test_backoff_nondecreasing_pre_cap() {
        let config = RetryConfig {
            max_retries: 8,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
        };

        // With ±10% jitter, delay(n+1) lower bound (0.9 × 2^(n+1)) always
        // exceeds delay(n) upper bound (1.1 × 2^n)
        for attempt in 0..7u32 {
            let a = backoff_delay(attempt, &config);
            let b = backoff_delay(attempt + 1, &config);
            assert!(b > a, "delay not increasing: {a:?} -> {b:?}");
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let outcome =
            execute_with_retry(|| async { Ok::<_, String>(7) }, &fast_config(3), |_| true).await;

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_delay, Duration::ZERO);
        assert_eq!(outcome.result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_exhausts_all_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let outcome = execute_with_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("connection refused".to_string())
                }
            },
            &fast_config(3),
            |_| true,
        )
        .await;

        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 4); // max_retries + 1
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(outcome.total_delay > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let outcome = execute_with_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("mapping error".to_string())
                }
            },
            &fast_config(5),
            |e: &String| transient_signature(e),
        )
        .await;

        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let outcome = execute_with_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("timeout".to_string())
                    } else {
                        Ok("indexed")
                    }
                }
            },
            &fast_config(5),
            |_| true,
        )
        .await;

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap(), "indexed");
    }

    #[tokio::test]
    async fn test_zero_retries_single_attempt() {
        let outcome = execute_with_retry(
            || async { Err::<(), _>("timeout".to_string()) },
            &fast_config(0),
            |_| true,
        )
        .await;

        assert_eq!(outcome.attempts, 1);
    }
}
