//! # searchsync
//!
//! Fault-tolerant change-data-capture sync engine: consumes ordered
//! mutation events from a message broker and applies them to a search
//! index, surviving dependency outages without losing messages or
//! wedging the queue.
//!
//! ## Architecture
//!
//! ```text
//!  broker queue ──► SyncConsumer ──► SearchIndex
//!                       │  ▲
//!            decode/validate  circuit breaker
//!                       │
//!                       ▼
//!   ErrorClassifier ──► PolicyTable ──► RecoveryExecutor
//!                                          │
//!                         retry / skip / alert / DeadLetterSink
//! ```
//!
//! Every inbound payload is decoded and validated before anything else
//! runs. Valid sync commands are tracked as jobs and applied to the
//! index behind a circuit breaker; failures are classified into a closed
//! error taxonomy, matched against a total recovery policy table, and
//! turned into a broker disposition by the [`recovery::RecoveryExecutor`].
//! Messages are never lost: every path ends in an explicit ack, a delayed
//! requeue, a reject, or a dead-letter publish that precedes the ack.
//!
//! The pure resilience building blocks (circuit breaker, retry backoff,
//! health history) live in the `searchsync-core-resilience` crate and
//! carry no broker or index knowledge.
//!
//! ## Example
//!
//! ```no_run
//! use searchsync::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<dyn MessageSource>, index: Arc<dyn SearchIndex>,
//! #              jobs: Arc<dyn JobStore>, dlq: Arc<dyn DlqTransport>) -> anyhow::Result<()> {
//! let config = EngineConfig::default();
//! let metrics = Arc::new(EngineMetrics::new());
//! let sink = Arc::new(DeadLetterSink::new(dlq, jobs.clone()));
//! let recovery = Arc::new(RecoveryExecutor::new(
//!     PolicyTable::standard(),
//!     config.retry.to_retry_config(),
//!     jobs.clone(),
//!     sink,
//!     Arc::new(LogAlerts),
//!     metrics.clone(),
//! ));
//!
//! let consumer = SyncConsumer::new(
//!     source,
//!     index,
//!     jobs,
//!     MessageValidator::new(&config.queue.expected_table),
//!     ErrorClassifier::standard(),
//!     recovery,
//!     metrics,
//!     Arc::new(CircuitBreaker::new("elasticsearch", config.circuit_breaker.to_breaker_config())),
//!     Arc::new(CircuitBreaker::new("rabbitmq", config.circuit_breaker.to_breaker_config())),
//! );
//! consumer.run().await
//! # }
//! ```

pub mod broker;
pub mod classify;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod error;
pub mod health;
pub mod index;
pub mod job;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod policy;
pub mod recovery;
pub mod testing;

pub use searchsync_core_resilience as resilience;

/// Common imports for embedding the engine
pub mod prelude {
    pub use crate::broker::{Disposition, InboundDelivery, MessageSource};
    pub use crate::classify::ErrorClassifier;
    pub use crate::config::EngineConfig;
    pub use crate::consumer::SyncConsumer;
    pub use crate::dlq::{DeadLetterSink, DlqEnvelope, DlqTransport};
    pub use crate::error::{ErrorKind, RecoveryAction, Severity, SyncError};
    pub use crate::health::{HealthAggregator, HealthConfig, HealthSummary};
    pub use crate::index::{IndexHealth, SearchIndex};
    pub use crate::job::{Job, JobStatus, JobStore};
    pub use crate::message::{InboundMessage, MessageValidator, SyncCommand, SyncOperation};
    pub use crate::metrics::EngineMetrics;
    pub use crate::policy::{PolicyTable, RecoveryPolicy};
    pub use crate::recovery::{AlertSink, LogAlerts, RecoveryExecutor};
    pub use searchsync_core_resilience::circuit_breaker::{CircuitBreaker, CircuitState};
    pub use searchsync_core_resilience::retry::RetryConfig;
}
