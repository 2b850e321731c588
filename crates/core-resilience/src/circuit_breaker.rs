//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents a failing dependency from being hammered
//! into worse failure by failing fast once it is judged unhealthy. It has
//! three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency is unhealthy, requests fail immediately
//! - HalfOpen: Testing if the dependency has recovered
//!
//! One breaker instance is held per protected dependency so that a failure
//! in one (say, the search index) does not trip another (the broker).
//! Breaker state is process-local: horizontally-scaled instances each track
//! their own view of dependency health, and a restart fails safe to Closed.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately.
    /// `next_attempt` indicates when the next call may probe half-open.
    Open { next_attempt: Instant },
    /// Circuit is half-open, testing dependency recovery
    HalfOpen,
}

impl CircuitState {
    /// Stable lowercase name for health reporting and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close the circuit
    pub success_threshold: u32,
    /// Duration to wait before an open circuit allows a half-open probe
    pub recovery_timeout: Duration,
    /// Failures further apart than this do not accumulate: a failure
    /// arriving after a quiet period of this length restarts the count
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(300),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
///
/// Wraps the operation's own error type so callers keep their domain
/// errors for downstream classification.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was never invoked.
    Open {
        /// Time remaining until the next half-open probe is allowed
        retry_in: Duration,
    },
    /// The operation ran and failed with its own error.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open { retry_in } => {
                write!(f, "circuit breaker is open, next attempt in {retry_in:?}")
            }
            BreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// Point-in-time view of a breaker, exported for health reporting
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    /// Current state of the circuit
    pub state: CircuitState,
    /// Consecutive failure count
    pub failure_count: u32,
    /// Consecutive success count (meaningful in half-open)
    pub success_count: u32,
    /// True iff the circuit is closed
    pub is_healthy: bool,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
        }
    }
}

/// Circuit breaker for protecting a single downstream dependency
///
/// # Example
/// ```no_run
/// use searchsync_core_resilience::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
///
/// # #[derive(Debug)] struct IndexError;
/// # impl std::fmt::Display for IndexError {
/// #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "boom") }
/// # }
/// #[tokio::main]
/// async fn main() {
///     let breaker = CircuitBreaker::new("search-index", CircuitBreakerConfig::default());
///
///     let result: Result<u32, BreakerError<IndexError>> = breaker
///         .execute(|| async {
///             // Your downstream call here
///             Ok(42)
///         })
///         .await;
///
///     assert_eq!(result.unwrap(), 42);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker guarding the named dependency
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    /// Name of the dependency this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state of the circuit breaker
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Point-in-time status for health reporting
    pub async fn status(&self) -> BreakerStatus {
        let state = self.state.lock().await;
        BreakerStatus {
            state: state.state,
            failure_count: state.consecutive_failures,
            success_count: state.consecutive_successes,
            is_healthy: state.state == CircuitState::Closed,
        }
    }

    /// Reset the circuit breaker to closed state
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.last_failure = None;
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// While the circuit is open and the recovery timeout has not elapsed,
    /// fails fast with [`BreakerError::Open`] without invoking the
    /// operation. Once the timeout has elapsed the next call transitions
    /// the circuit to half-open and the operation runs as a probe.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.check_and_update_state().await?;

        match op().await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(e) => {
                self.on_failure().await;
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Check circuit state, transitioning open → half-open when due
    async fn check_and_update_state<E>(&self) -> Result<(), BreakerError<E>> {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { next_attempt } => {
                let now = Instant::now();
                if now >= next_attempt {
                    debug!(breaker = %self.name, "circuit transitioning to half-open");
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    Ok(())
                } else {
                    Err(BreakerError::Open {
                        retry_in: next_attempt - now,
                    })
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => {
                // Success resets the failure count outside half-open
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;

                if state.consecutive_successes >= self.config.success_threshold {
                    debug!(breaker = %self.name, "circuit closed after recovery");
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    state.last_failure = None;
                }
            }
            CircuitState::Open { .. } => {
                // Should not happen, but fail safe to closed if it does
                state.state = CircuitState::Closed;
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        match state.state {
            CircuitState::Closed => {
                // A failure after a quiet monitoring window restarts the count
                if let Some(last) = state.last_failure {
                    if now.duration_since(last) > self.config.monitoring_window {
                        state.consecutive_failures = 0;
                    }
                }
                state.consecutive_failures += 1;
                state.last_failure = Some(now);

                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        "circuit opened"
                    );
                    state.state = CircuitState::Open {
                        next_attempt: now + self.config.recovery_timeout,
                    };
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open re-opens the circuit immediately
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
                state.state = CircuitState::Open {
                    next_attempt: now + self.config.recovery_timeout,
                };
                state.consecutive_successes = 0;
                state.last_failure = Some(now);
            }
            CircuitState::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        breaker
            .execute(|| async { Err::<(), _>(TestError("connection refused")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        breaker.execute(|| async { Ok(()) }).await
    }

    fn config(failures: u32, successes: u32, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            recovery_timeout: Duration::from_millis(recovery_ms),
            monitoring_window: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_opens_on_threshold() {
        let breaker = CircuitBreaker::new("index", config(5, 3, 100));

        for _ in 0..4 {
            assert!(fail(&breaker).await.is_err());
            assert_eq!(breaker.state().await, CircuitState::Closed);
        }

        // 5th consecutive failure opens the circuit
        assert!(fail(&breaker).await.is_err());
        assert!(matches!(
            breaker.state().await,
            CircuitState::Open { .. }
        ));
    }

    #[tokio::test]
    async fn test_open_fails_fast_without_invoking() {
        let breaker = CircuitBreaker::new("index", config(1, 1, 10_000));
        assert!(fail(&breaker).await.is_err());

        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = invoked.clone();
        let result: Result<(), BreakerError<TestError>> = breaker
            .execute(|| async move {
                invoked_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_half_open_to_closed() {
        let breaker = CircuitBreaker::new("index", config(2, 3, 20));

        for _ in 0..2 {
            let _ = fail(&breaker).await;
        }
        assert!(matches!(breaker.state().await, CircuitState::Open { .. }));

        tokio::time::sleep(Duration::from_millis(30)).await;

        // First call after timeout probes half-open
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        // Two more successes reach success_threshold=3 and close
        assert!(succeed(&breaker).await.is_ok());
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("index", config(1, 2, 20));

        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Probe fails: back to open immediately
        let _ = fail(&breaker).await;
        assert!(matches!(breaker.state().await, CircuitState::Open { .. }));

        // And the recovery timer restarted, so the next call fails fast
        let result = succeed(&breaker).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("index", config(3, 1, 100));

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.status().await.failure_count, 2);

        let _ = succeed(&breaker).await;
        assert_eq!(breaker.status().await.failure_count, 0);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_monitoring_window_restarts_count() {
        let breaker = CircuitBreaker::new(
            "index",
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
                monitoring_window: Duration::from_millis(10),
            },
        );

        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second failure lands outside the window: count restarts at 1
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.status().await.failure_count, 1);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = CircuitBreaker::new("index", config(1, 1, 10_000));
        let _ = fail(&breaker).await;
        assert!(matches!(breaker.state().await, CircuitState::Open { .. }));

        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.status().await.is_healthy);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let breaker = CircuitBreaker::new("broker", config(5, 3, 100));
        let _ = fail(&breaker).await;

        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.success_count, 0);
        assert!(status.is_healthy);
        assert_eq!(breaker.name(), "broker");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CircuitState::Closed.name(), "closed");
        assert_eq!(CircuitState::HalfOpen.name(), "half_open");
        assert_eq!(
            CircuitState::Open {
                next_attempt: Instant::now()
            }
            .name(),
            "open"
        );
    }
}
