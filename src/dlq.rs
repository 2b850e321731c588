//! Dead-letter sink: terminal parking lot for unrecoverable messages
//!
//! Messages land here only after recovery gives up. The original payload is
//! wrapped in an envelope carrying failure context and published to the
//! dead-letter queue BEFORE the source message is acknowledged, so a crash
//! between the two can duplicate a dead letter but never lose one. The
//! wrapped payload is byte-for-byte the original; replay republishes it to
//! its original queue unchanged.

use crate::error::ErrorKind;
use crate::job::{JobStatus, JobStatusUpdate, JobStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use searchsync_core_resilience::retry::{execute_with_retry, transient_signature, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Envelope wrapped around a dead-lettered message. Immutable once
/// published; replay never rewrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEnvelope {
    pub message_id: String,
    /// Original payload, byte-for-byte as consumed
    pub original_message: String,
    pub original_queue: String,
    pub error_message: String,
    pub error_type: ErrorKind,
    /// Retry count at the moment of escalation
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
    pub trace_id: Option<String>,
    pub job_id: Option<String>,
}

/// Aggregate view over the dead-letter queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DlqStats {
    pub total_messages: u64,
    pub by_error_type: HashMap<ErrorKind, u64>,
    pub by_queue: HashMap<String, u64>,
    pub oldest_failure: Option<DateTime<Utc>>,
    pub newest_failure: Option<DateTime<Utc>>,
}

/// Dead-letter queue transport boundary
#[async_trait]
pub trait DlqTransport: Send + Sync {
    async fn publish(&self, envelope: &DlqEnvelope) -> Result<()>;

    async fn depth(&self) -> Result<u64>;

    /// Fetch a parked envelope by message id without removing others
    async fn fetch(&self, message_id: &str) -> Result<Option<DlqEnvelope>>;

    /// Remove a parked envelope after successful replay
    async fn remove(&self, message_id: &str) -> Result<()>;

    /// Republish a raw payload to its original queue
    async fn requeue(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Drop every parked envelope, returning how many were dropped
    async fn purge(&self) -> Result<u64>;

    /// All parked envelopes, for per-queue statistics
    async fn snapshot(&self) -> Result<Vec<DlqEnvelope>>;
}

/// Context handed to the sink when a message is escalated
#[derive(Debug, Clone)]
pub struct DeadLetterRequest {
    pub message_id: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub error_message: String,
    pub error_type: ErrorKind,
    pub retry_count: u32,
    pub trace_id: Option<String>,
    pub job_id: Option<String>,
}

/// Publishes dead letters and keeps job rows in sync
pub struct DeadLetterSink {
    transport: Arc<dyn DlqTransport>,
    jobs: Arc<dyn JobStore>,
    publish_retry: RetryConfig,
}

impl DeadLetterSink {
    pub fn new(transport: Arc<dyn DlqTransport>, jobs: Arc<dyn JobStore>) -> Self {
        // Losing a dead letter defeats the whole sink, so the publish
        // itself retries transient broker failures briefly
        let publish_retry = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        };
        Self {
            transport,
            jobs,
            publish_retry,
        }
    }

    /// Park a message on the dead-letter queue and mark its job failed.
    ///
    /// The publish happens first; only after it succeeds is the job row
    /// transitioned, and only then should the caller ack the source
    /// message.
    pub async fn send_to_dlq(&self, request: DeadLetterRequest) -> Result<DlqEnvelope> {
        let envelope = DlqEnvelope {
            message_id: request.message_id,
            original_message: String::from_utf8_lossy(&request.payload).into_owned(),
            original_queue: request.queue,
            error_message: request.error_message.clone(),
            error_type: request.error_type,
            retry_count: request.retry_count,
            failed_at: Utc::now(),
            trace_id: request.trace_id,
            job_id: request.job_id.clone(),
        };

        let outcome = execute_with_retry(
            || self.transport.publish(&envelope),
            &self.publish_retry,
            |e: &anyhow::Error| transient_signature(&format!("{e:#}")),
        )
        .await;
        outcome.result.context("publishing dead-letter envelope")?;

        warn!(
            message_id = %envelope.message_id,
            error_type = %envelope.error_type,
            retry_count = envelope.retry_count,
            "message sent to dead-letter queue"
        );

        if let Some(job_id) = &request.job_id {
            self.jobs
                .update_status(
                    job_id,
                    JobStatus::Failed,
                    JobStatusUpdate {
                        error_message: Some(request.error_message),
                        error_type: Some(request.error_type),
                        retry_count: Some(request.retry_count),
                        processed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await
                .context("marking dead-lettered job failed")?;
        }

        Ok(envelope)
    }

    /// Aggregate statistics across the job store and the live queue
    pub async fn stats(&self) -> Result<DlqStats> {
        let mut stats = DlqStats {
            total_messages: self.transport.depth().await?,
            ..Default::default()
        };

        for job in self.jobs.failed_jobs().await? {
            if let Some(kind) = job.error_type {
                *stats.by_error_type.entry(kind).or_insert(0) += 1;
            }
            let failed_at = job.processed_at.unwrap_or(job.created_at);
            stats.oldest_failure = match stats.oldest_failure {
                Some(t) if t <= failed_at => Some(t),
                _ => Some(failed_at),
            };
            stats.newest_failure = match stats.newest_failure {
                Some(t) if t >= failed_at => Some(t),
                _ => Some(failed_at),
            };
        }

        for envelope in self.transport.snapshot().await? {
            *stats.by_queue.entry(envelope.original_queue).or_insert(0) += 1;
        }

        Ok(stats)
    }

    /// Replay a parked message back onto its original queue.
    ///
    /// The original payload is republished unchanged; the associated job
    /// (if any) is reset to pending with its retry count cleared. Returns
    /// false when the message id is not parked.
    pub async fn replay(&self, message_id: &str) -> Result<bool> {
        let Some(envelope) = self.transport.fetch(message_id).await? else {
            return Ok(false);
        };

        self.transport
            .requeue(&envelope.original_queue, envelope.original_message.as_bytes())
            .await
            .context("republishing dead-lettered message")?;
        self.transport.remove(message_id).await?;

        if let Some(job_id) = &envelope.job_id {
            self.jobs
                .update_status(
                    job_id,
                    JobStatus::Pending,
                    JobStatusUpdate {
                        retry_count: Some(0),
                        ..Default::default()
                    },
                )
                .await
                .context("resetting replayed job")?;
        }

        info!(message_id, queue = %envelope.original_queue, "replayed dead-lettered message");
        Ok(true)
    }

    /// Replay every parked message, returning how many were replayed
    pub async fn replay_all(&self) -> Result<u64> {
        let mut replayed = 0;
        for envelope in self.transport.snapshot().await? {
            if self.replay(&envelope.message_id).await? {
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    /// Drop every parked message, returning how many were dropped
    pub async fn clear(&self) -> Result<u64> {
        let purged = self.transport.purge().await?;
        info!(purged, "cleared dead-letter queue");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::message::SyncOperation;
    use crate::testing::{MemoryDlqTransport, MemoryJobStore};

    fn request(message_id: &str, job_id: Option<&str>) -> DeadLetterRequest {
        DeadLetterRequest {
            message_id: message_id.to_string(),
            payload: br#"{"type":"ELASTICSEARCH_SYNC"}"#.to_vec(),
            queue: "elasticsearch.sync".to_string(),
            error_message: "retry attempts exhausted".to_string(),
            error_type: ErrorKind::MaxRetriesExceeded,
            retry_count: 3,
            trace_id: Some("t-1".to_string()),
            job_id: job_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_send_publishes_and_fails_job() {
        let transport = Arc::new(MemoryDlqTransport::new());
        let jobs = Arc::new(MemoryJobStore::new());
        jobs.insert_job(&Job::new("job-1", "rec-1", SyncOperation::Update))
            .await
            .unwrap();

        let sink = DeadLetterSink::new(transport.clone(), jobs.clone());
        let envelope = sink.send_to_dlq(request("msg-1", Some("job-1"))).await.unwrap();

        assert_eq!(envelope.retry_count, 3);
        assert_eq!(transport.depth().await.unwrap(), 1);
        let job = jobs.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_type, Some(ErrorKind::MaxRetriesExceeded));
    }

    #[tokio::test]
    async fn test_envelope_preserves_payload() {
        let transport = Arc::new(MemoryDlqTransport::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let sink = DeadLetterSink::new(transport.clone(), jobs);

        let envelope = sink.send_to_dlq(request("msg-1", None)).await.unwrap();
        assert_eq!(envelope.original_message, r#"{"type":"ELASTICSEARCH_SYNC"}"#);
    }

    #[tokio::test]
    async fn test_replay_resets_job_and_requeues() {
        let transport = Arc::new(MemoryDlqTransport::new());
        let jobs = Arc::new(MemoryJobStore::new());
        jobs.insert_job(&Job::new("job-1", "rec-1", SyncOperation::Update))
            .await
            .unwrap();

        let sink = DeadLetterSink::new(transport.clone(), jobs.clone());
        sink.send_to_dlq(request("msg-1", Some("job-1"))).await.unwrap();

        assert!(sink.replay("msg-1").await.unwrap());
        assert_eq!(transport.depth().await.unwrap(), 0);

        let requeued = transport.requeued();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].0, "elasticsearch.sync");
        assert_eq!(requeued[0].1, br#"{"type":"ELASTICSEARCH_SYNC"}"#.to_vec());

        let job = jobs.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn test_replay_unknown_message() {
        let transport = Arc::new(MemoryDlqTransport::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let sink = DeadLetterSink::new(transport, jobs);
        assert!(!sink.replay("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats() {
        let transport = Arc::new(MemoryDlqTransport::new());
        let jobs = Arc::new(MemoryJobStore::new());
        jobs.insert_job(&Job::new("job-1", "rec-1", SyncOperation::Insert))
            .await
            .unwrap();
        jobs.insert_job(&Job::new("job-2", "rec-2", SyncOperation::Delete))
            .await
            .unwrap();

        let sink = DeadLetterSink::new(transport.clone(), jobs.clone());
        sink.send_to_dlq(request("msg-1", Some("job-1"))).await.unwrap();
        let mut second = request("msg-2", Some("job-2"));
        second.error_type = ErrorKind::RetryFailed;
        sink.send_to_dlq(second).await.unwrap();

        let stats = sink.stats().await.unwrap();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.by_error_type[&ErrorKind::MaxRetriesExceeded], 1);
        assert_eq!(stats.by_error_type[&ErrorKind::RetryFailed], 1);
        assert_eq!(stats.by_queue["elasticsearch.sync"], 2);
        assert!(stats.oldest_failure.unwrap() <= stats.newest_failure.unwrap());
    }

    #[tokio::test]
    async fn test_replay_all() {
        let transport = Arc::new(MemoryDlqTransport::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let sink = DeadLetterSink::new(transport.clone(), jobs);

        sink.send_to_dlq(request("msg-1", None)).await.unwrap();
        sink.send_to_dlq(request("msg-2", None)).await.unwrap();

        assert_eq!(sink.replay_all().await.unwrap(), 2);
        assert_eq!(transport.depth().await.unwrap(), 0);
        assert_eq!(transport.requeued().len(), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let transport = Arc::new(MemoryDlqTransport::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let sink = DeadLetterSink::new(transport.clone(), jobs);

        sink.send_to_dlq(request("msg-1", None)).await.unwrap();
        sink.send_to_dlq(request("msg-2", None)).await.unwrap();

        assert_eq!(sink.clear().await.unwrap(), 2);
        assert_eq!(transport.depth().await.unwrap(), 0);
    }
}
