//! Message broker boundary
//!
//! Abstracts the queue transport: sequential delivery fetch with manual
//! acknowledgement, so the consumer controls exactly when a message leaves
//! the queue. Prefetch is one; ordering within the queue is preserved by
//! acking or nacking each delivery before fetching the next.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A raw delivery pulled from the queue
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    /// Broker acknowledgement handle
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub queue: String,
}

/// What the consumer decided to do with a delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disposition {
    /// Done with this message, remove it from the queue
    Ack,
    /// Return to the queue for another attempt after the delay
    Requeue { delay: Duration },
    /// Drop without requeue (dead-letters at the broker if configured)
    Reject,
}

/// Queue transport boundary
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Next delivery, or `None` when the source is drained/closed
    async fn next(&self) -> Result<Option<InboundDelivery>>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Negative-acknowledge with requeue
    async fn nack_requeue(&self, delivery_tag: u64) -> Result<()>;

    /// Drop the message without requeue
    async fn reject(&self, delivery_tag: u64) -> Result<()>;

    /// Cheap liveness probe against the broker connection
    async fn ping(&self) -> Result<()>;

    /// Current depth of the consumed queue
    async fn queue_depth(&self) -> Result<u64>;
}
