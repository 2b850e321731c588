//! searchsync Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks the sync engine uses to survive
//! partial failures of its downstream dependencies:
//!
//! - **Circuit Breaker**: Prevents cascading failures by failing fast when a dependency is unhealthy
//! - **Retry Scheduler**: Bounded-attempt execution with jittered exponential backoff
//! - **Health History**: Bounded snapshot retention with trend derivation
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Message brokers or queue semantics
//! - Search indexes or storage systems
//! - Application-specific error taxonomies
//!
//! It provides generic, composable fault-tolerance patterns; the engine
//! layers its own classification and recovery policies on top.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Sync Engine                     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker (per dependency)  │  ← Fail-fast protection
//! │  (Tracks failures, opens on threshold)  │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Scheduler                   │  ← Bounded backoff
//! │  (min(base × mult^n, max) ± 10% jitter) │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Dependency
//!     (search index, broker, job store)
//!
//!  Continuously running:
//!   Health History → uptime / score / 24h trend
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod health_history;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{
    BreakerError, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use error::ResilienceError;
pub use health_history::{
    HealthHistory, HealthSnapshot, HealthTrends, ServiceStatus, StatusCounts,
};
pub use retry::{
    backoff_delay, execute_with_retry, transient_signature, RetryConfig, RetryOutcome,
};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use searchsync_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{
        BreakerError, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    };
    pub use super::error::ResilienceError;
    pub use super::health_history::{HealthHistory, HealthSnapshot, HealthTrends, ServiceStatus};
    pub use super::retry::{
        backoff_delay, execute_with_retry, transient_signature, RetryConfig, RetryOutcome,
    };
}
