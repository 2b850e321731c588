//! Sequential sync consumer
//!
//! Pulls deliveries one at a time, decodes and validates them, applies
//! sync commands to the index behind a circuit breaker, and enacts the
//! disposition the recovery executor hands back. Acknowledgement is manual
//! and strictly per-message: nothing leaves the queue until its outcome is
//! decided, and a requeue delay is served before the nack so queue order
//! is preserved under prefetch one.

use crate::broker::{Disposition, InboundDelivery, MessageSource};
use crate::classify::ErrorClassifier;
use crate::error::{generate_trace_id, ErrorKind};
use crate::index::{apply_operation, SearchIndex};
use crate::job::{Job, JobStatus, JobStatusUpdate, JobStore};
use crate::message::{InboundMessage, MessageValidator, SyncCommand};
use crate::metrics::EngineMetrics;
use crate::recovery::{MessageContext, RecoveryExecutor};
use anyhow::Result;
use chrono::Utc;
use searchsync_core_resilience::circuit_breaker::{BreakerError, CircuitBreaker};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff applied when the broker itself errors or its breaker is open
const BROKER_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct SyncConsumer {
    source: Arc<dyn MessageSource>,
    index: Arc<dyn SearchIndex>,
    jobs: Arc<dyn JobStore>,
    validator: MessageValidator,
    classifier: ErrorClassifier,
    recovery: Arc<RecoveryExecutor>,
    metrics: Arc<EngineMetrics>,
    index_breaker: Arc<CircuitBreaker>,
    broker_breaker: Arc<CircuitBreaker>,
    running: Arc<AtomicBool>,
}

impl SyncConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn MessageSource>,
        index: Arc<dyn SearchIndex>,
        jobs: Arc<dyn JobStore>,
        validator: MessageValidator,
        classifier: ErrorClassifier,
        recovery: Arc<RecoveryExecutor>,
        metrics: Arc<EngineMetrics>,
        index_breaker: Arc<CircuitBreaker>,
        broker_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            source,
            index,
            jobs,
            validator,
            classifier,
            recovery,
            metrics,
            index_breaker,
            broker_breaker,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request the run loop to stop after the in-flight message
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared view of the running flag, for the health aggregator
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Consume until the source is drained or [`stop`](Self::stop) is
    /// called. Broker errors back off and retry; they never abort the
    /// loop.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!("sync consumer started");

        while self.running.load(Ordering::SeqCst) {
            let delivery = match self.broker_breaker.execute(|| self.source.next()).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    info!("message source drained, consumer stopping");
                    break;
                }
                Err(BreakerError::Open { retry_in }) => {
                    warn!(retry_in_ms = retry_in.as_millis() as u64, "broker circuit open");
                    tokio::time::sleep(retry_in.min(BROKER_ERROR_BACKOFF)).await;
                    continue;
                }
                Err(BreakerError::Inner(e)) => {
                    error!(error = %e, "failed to fetch delivery");
                    tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let tag = delivery.delivery_tag;
            let disposition = self.process_delivery(&delivery).await;
            if let Err(e) = self.enact(tag, disposition).await {
                error!(delivery_tag = tag, error = %e, "failed to settle delivery");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("sync consumer stopped");
        Ok(())
    }

    async fn enact(&self, tag: u64, disposition: Disposition) -> Result<()> {
        match disposition {
            Disposition::Ack => self.source.ack(tag).await,
            Disposition::Reject => self.source.reject(tag).await,
            Disposition::Requeue { delay } => {
                // Serve the backoff before returning the message so the
                // immediate redelivery does not hot-loop
                tokio::time::sleep(delay).await;
                self.source.nack_requeue(tag).await
            }
        }
    }

    /// Decide the fate of one delivery. Infallible by construction: any
    /// internal failure collapses to a disposition.
    pub async fn process_delivery(&self, delivery: &InboundDelivery) -> Disposition {
        let message = match self.validator.decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) if e.is_unparsable() => {
                // Scenario for poison payloads: drop without requeue so
                // one bad byte stream cannot wedge the queue
                self.metrics.malformed_messages_total.inc();
                warn!(queue = %delivery.queue, error = %e, "rejecting unparsable payload");
                return Disposition::Reject;
            }
            Err(e) => {
                let error = self.recovery.policies().create_error(
                    e.kind(),
                    e.to_string(),
                    None,
                    BTreeMap::new(),
                    0,
                );
                let ctx = MessageContext {
                    payload: delivery.payload.clone(),
                    queue: delivery.queue.clone(),
                    message_id: generate_trace_id(),
                    job_id: None,
                    retry_count: 0,
                };
                return self.recover(&error, &ctx).await;
            }
        };

        match message {
            InboundMessage::StatusChange { listing_id, status } => {
                debug!(listing_id, status, "status-change marker acknowledged");
                Disposition::Ack
            }
            InboundMessage::Sync(command) => self.handle_sync(delivery, command).await,
        }
    }

    async fn handle_sync(&self, delivery: &InboundDelivery, command: SyncCommand) -> Disposition {
        // Jobs are created upstream before the message is enqueued; a
        // missing job is logged and the apply proceeds untracked
        let job = match self.correlate(&command).await {
            Ok(job) => job,
            Err(e) => {
                error!(record_id = %command.record_id, error = %e, "job store unavailable");
                let error = self.recovery.policies().create_error(
                    ErrorKind::DatabaseUnavailable,
                    format!("job store error: {e:#}"),
                    None,
                    BTreeMap::new(),
                    0,
                );
                let ctx = self.context(delivery, &command, None, 0);
                return self.recover(&error, &ctx).await;
            }
        };
        if job.is_none() {
            warn!(record_id = %command.record_id, "no job correlated for record");
        }

        let trace_id = job
            .as_ref()
            .and_then(|j| j.trace_id.clone())
            .unwrap_or_else(generate_trace_id);
        let retry_count = job.as_ref().map(|j| j.retry_count).unwrap_or(0);

        if let Some(job) = &job {
            if let Err(e) = self
                .jobs
                .update_status(
                    &job.id,
                    JobStatus::Processing,
                    JobStatusUpdate {
                        trace_id: Some(trace_id.clone()),
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(job_id = %job.id, error = %e, "failed to mark job processing");
            }
        }

        let timer = std::time::Instant::now();
        let result = self
            .index_breaker
            .execute(|| {
                apply_operation(
                    self.index.as_ref(),
                    command.operation,
                    &command.record_id,
                    &command.change_data,
                )
            })
            .await;

        match result {
            Ok(()) => {
                self.metrics
                    .apply_duration_seconds
                    .with_label_values(&[command.operation.as_str(), "success"])
                    .observe(timer.elapsed().as_secs_f64());

                if let Some(job) = &job {
                    if let Err(e) = self
                        .jobs
                        .update_status(
                            &job.id,
                            JobStatus::Completed,
                            JobStatusUpdate {
                                processed_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await
                    {
                        warn!(job_id = %job.id, error = %e, "failed to mark job completed");
                    }
                }

                self.metrics
                    .messages_total
                    .with_label_values(&[command.operation.as_str(), "completed"])
                    .inc();
                info!(
                    operation = %command.operation,
                    record_id = %command.record_id,
                    trace_id = %trace_id,
                    "sync applied"
                );
                Disposition::Ack
            }
            Err(failure) => {
                self.metrics
                    .apply_duration_seconds
                    .with_label_values(&[command.operation.as_str(), "error"])
                    .observe(timer.elapsed().as_secs_f64());

                let error = match failure {
                    BreakerError::Open { retry_in } => self.recovery.policies().create_error(
                        ErrorKind::ElasticsearchUnavailable,
                        format!(
                            "index circuit open, next attempt in {}ms",
                            retry_in.as_millis()
                        ),
                        Some(trace_id),
                        BTreeMap::new(),
                        retry_count,
                    ),
                    BreakerError::Inner(e) => {
                        let kind = self.classifier.classify_error(&e);
                        self.recovery.policies().create_error(
                            kind,
                            format!("{e:#}"),
                            Some(trace_id),
                            BTreeMap::new(),
                            retry_count,
                        )
                    }
                };

                let job_id = job.as_ref().map(|j| j.id.clone());
                let ctx = self.context(delivery, &command, job_id.clone(), retry_count);
                let disposition = self.recover(&error, &ctx).await;

                // Count terminal outcomes decided by recovery
                if let Some(job_id) = &job_id {
                    if let Ok(Some(after)) = self.jobs.get_job(job_id).await {
                        if after.status.is_terminal() {
                            self.metrics
                                .messages_total
                                .with_label_values(&[
                                    command.operation.as_str(),
                                    after.status.as_str(),
                                ])
                                .inc();
                        }
                    }
                }

                disposition
            }
        }
    }

    /// Most recent non-terminal job for this record, if the producer
    /// created one
    async fn correlate(&self, command: &SyncCommand) -> Result<Option<Job>> {
        match self.jobs.find_job_for_record(&command.record_id).await? {
            Some(job_id) => self.jobs.get_job(&job_id).await,
            None => Ok(None),
        }
    }

    fn context(
        &self,
        delivery: &InboundDelivery,
        command: &SyncCommand,
        job_id: Option<String>,
        retry_count: u32,
    ) -> MessageContext {
        let message_id = if command.message_id.is_empty() {
            generate_trace_id()
        } else {
            command.message_id.clone()
        };
        MessageContext {
            payload: delivery.payload.clone(),
            queue: delivery.queue.clone(),
            message_id,
            job_id,
            retry_count,
        }
    }

    /// Route a classified error through recovery; a recovery failure
    /// degrades to a requeue so the message is not lost
    async fn recover(&self, error: &crate::error::SyncError, ctx: &MessageContext) -> Disposition {
        match self.recovery.handle(error, ctx).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(error = %e, message_id = %ctx.message_id, "recovery itself failed");
                Disposition::Requeue {
                    delay: BROKER_ERROR_BACKOFF,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::DeadLetterSink;
    use crate::policy::PolicyTable;
    use crate::recovery::LogAlerts;
    use crate::testing::{MemoryDlqTransport, MemoryIndex, MemoryJobStore};
    use searchsync_core_resilience::circuit_breaker::CircuitBreakerConfig;
    use searchsync_core_resilience::retry::RetryConfig;
    use serde_json::json;

    struct Fixture {
        consumer: SyncConsumer,
        index: Arc<MemoryIndex>,
        jobs: Arc<MemoryJobStore>,
        metrics: Arc<EngineMetrics>,
    }

    fn fixture() -> Fixture {
        let index = Arc::new(MemoryIndex::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let dlq_transport = Arc::new(MemoryDlqTransport::new());
        let metrics = Arc::new(EngineMetrics::new());
        let dlq = Arc::new(DeadLetterSink::new(dlq_transport, jobs.clone()));
        let recovery = Arc::new(RecoveryExecutor::new(
            PolicyTable::standard(),
            RetryConfig::default(),
            jobs.clone(),
            dlq,
            Arc::new(LogAlerts),
            metrics.clone(),
        ));
        let source = Arc::new(crate::testing::MemoryBroker::new("elasticsearch.sync"));
        let consumer = SyncConsumer::new(
            source,
            index.clone(),
            jobs.clone(),
            MessageValidator::new("listings"),
            ErrorClassifier::standard(),
            recovery,
            metrics.clone(),
            Arc::new(CircuitBreaker::new("elasticsearch", CircuitBreakerConfig::default())),
            Arc::new(CircuitBreaker::new("rabbitmq", CircuitBreakerConfig::default())),
        );
        Fixture {
            consumer,
            index,
            jobs,
            metrics,
        }
    }

    fn delivery(payload: serde_json::Value) -> InboundDelivery {
        InboundDelivery {
            delivery_tag: 1,
            payload: payload.to_string().into_bytes(),
            queue: "elasticsearch.sync".to_string(),
        }
    }

    fn insert_payload(record_id: &str) -> serde_json::Value {
        json!({
            "type": "ELASTICSEARCH_SYNC",
            "operation": "INSERT",
            "table": "listings",
            "recordId": record_id,
            "changeData": { "title": "Loft" },
            "messageId": "msg-1"
        })
    }

    async fn seed_job(jobs: &crate::testing::MemoryJobStore, record_id: &str) {
        jobs.insert_job(&Job::new(format!("job-{record_id}"), record_id, crate::message::SyncOperation::Insert))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_valid_insert_completes_job() {
        let f = fixture();
        seed_job(&f.jobs, "rec-1").await;
        let disposition = f.consumer.process_delivery(&delivery(insert_payload("rec-1"))).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(f.index.index_calls(), 1);
        assert_eq!(f.index.document("rec-1").unwrap()["title"], "Loft");

        let job = f.jobs.get_job("job-rec-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.processed_at.is_some());
        assert!(job.trace_id.is_some());
    }

    #[tokio::test]
    async fn test_missing_job_still_applies() {
        let f = fixture();
        let disposition = f.consumer.process_delivery(&delivery(insert_payload("rec-1"))).await;

        // No producer-created job: the apply still happens, untracked
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(f.index.index_calls(), 1);
        assert_eq!(f.jobs.job_count(), 0);
    }

    #[tokio::test]
    async fn test_status_change_acked_without_index_call() {
        let f = fixture();
        let disposition = f
            .consumer
            .process_delivery(&delivery(json!({ "listingId": "lst-1", "status": "SOLD" })))
            .await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(f.index.index_calls(), 0);
    }

    #[tokio::test]
    async fn test_unparsable_payload_rejected() {
        let f = fixture();
        let raw = InboundDelivery {
            delivery_tag: 1,
            payload: b"{broken".to_vec(),
            queue: "elasticsearch.sync".to_string(),
        };

        let disposition = f.consumer.process_delivery(&raw).await;
        assert_eq!(disposition, Disposition::Reject);
        assert_eq!(f.metrics.malformed_messages_total.get(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_without_requeue() {
        let f = fixture();
        // Parses fine, but the operation is unsupported
        let payload = json!({
            "type": "ELASTICSEARCH_SYNC",
            "operation": "TRUNCATE",
            "table": "listings",
            "recordId": "rec-1",
            "changeData": {}
        });

        let disposition = f.consumer.process_delivery(&delivery(payload)).await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(f.index.index_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_index_failure_requeues() {
        let f = fixture();
        seed_job(&f.jobs, "rec-1").await;
        f.index.fail_times(1, "connect ETIMEDOUT 10.0.0.5:9200");

        let disposition = f.consumer.process_delivery(&delivery(insert_payload("rec-1"))).await;
        assert!(matches!(disposition, Disposition::Requeue { .. }));

        let job = f.jobs.get_job("job-rec-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retry);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn test_delete_of_missing_record_completes() {
        let f = fixture();
        seed_job(&f.jobs, "rec-missing").await;
        let payload = json!({
            "type": "ELASTICSEARCH_SYNC",
            "operation": "DELETE",
            "table": "listings",
            "recordId": "rec-missing",
            "changeData": {}
        });

        let disposition = f.consumer.process_delivery(&delivery(payload)).await;
        assert_eq!(disposition, Disposition::Ack);

        let job = f.jobs.get_job("job-rec-missing").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_reuses_existing_job_for_record() {
        let f = fixture();
        seed_job(&f.jobs, "rec-1").await;
        f.index.fail_times(1, "connect ETIMEDOUT 10.0.0.5:9200");

        // First attempt leaves the job in retry
        let _ = f.consumer.process_delivery(&delivery(insert_payload("rec-1"))).await;

        // Redelivery picks up the same job and completes it
        let disposition = f.consumer.process_delivery(&delivery(insert_payload("rec-1"))).await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(f.jobs.job_count(), 1);

        let job = f.jobs.get_job("job-rec-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
    }
}
