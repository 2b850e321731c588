//! Recovery executor: turns classified errors into dispositions
//!
//! Every failure the consumer sees flows through here exactly once. The
//! executor looks up the recovery policy, counts occurrences for alert
//! thresholds, keeps the job row honest, and hands back a broker
//! disposition the consumer enacts. It never touches the broker itself.

use crate::broker::Disposition;
use crate::dlq::{DeadLetterRequest, DeadLetterSink};
use crate::error::{ErrorKind, RecoveryAction, SyncError};
use crate::job::{JobStatus, JobStatusUpdate, JobStore};
use crate::metrics::EngineMetrics;
use crate::policy::PolicyTable;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use searchsync_core_resilience::retry::{backoff_delay, RetryConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error as log_error, info, warn};

/// Destination for operator alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, error: &SyncError, occurrences: u64);
}

/// Default sink: structured error-level log lines
pub struct LogAlerts;

#[async_trait]
impl AlertSink for LogAlerts {
    async fn alert(&self, error: &SyncError, occurrences: u64) {
        log_error!(
            kind = %error.kind,
            severity = %error.severity,
            occurrences,
            trace_id = %error.trace_id,
            "ALERT: {}",
            error.message
        );
    }
}

/// Per-message context the executor needs to act on a failure
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub payload: Vec<u8>,
    pub queue: String,
    pub message_id: String,
    pub job_id: Option<String>,
    /// Delivery attempts already consumed for this message
    pub retry_count: u32,
}

/// Applies recovery policies to classified errors
pub struct RecoveryExecutor {
    policies: PolicyTable,
    retry: RetryConfig,
    jobs: Arc<dyn JobStore>,
    dlq: Arc<DeadLetterSink>,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<EngineMetrics>,
    occurrences: Mutex<HashMap<ErrorKind, u64>>,
}

impl RecoveryExecutor {
    pub fn new(
        policies: PolicyTable,
        retry: RetryConfig,
        jobs: Arc<dyn JobStore>,
        dlq: Arc<DeadLetterSink>,
        alerts: Arc<dyn AlertSink>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            policies,
            retry,
            jobs,
            dlq,
            alerts,
            metrics,
            occurrences: Mutex::new(HashMap::new()),
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Handle a classified error for one message, returning the broker
    /// disposition the consumer should enact.
    pub async fn handle(&self, error: &SyncError, ctx: &MessageContext) -> Result<Disposition> {
        self.metrics
            .errors_total
            .with_label_values(&[error.kind.as_str(), error.severity.as_str()])
            .inc();
        if error.retryable {
            self.metrics.retryable_errors_total.inc();
        } else {
            self.metrics.non_retryable_errors_total.inc();
        }

        let occurrences = {
            let mut counts = self.occurrences.lock().await;
            let entry = counts.entry(error.kind).or_insert(0);
            *entry += 1;
            *entry
        };

        if self.policies.should_alert(error.kind, occurrences) {
            self.alerts.alert(error, occurrences).await;
            self.metrics.alerts_total.inc();
            if let Some(job_id) = &ctx.job_id {
                self.jobs
                    .annotate(
                        job_id,
                        JobStatusUpdate::with_error(error.kind, error.message.clone()),
                    )
                    .await?;
            }
        }

        match error.action {
            RecoveryAction::Retry => self.handle_retry(error, ctx).await,
            RecoveryAction::Skip => {
                info!(
                    kind = %error.kind,
                    message_id = %ctx.message_id,
                    "skipping message: {}",
                    error.message
                );
                if let Some(job_id) = &ctx.job_id {
                    self.jobs
                        .update_status(
                            job_id,
                            JobStatus::Skipped,
                            JobStatusUpdate {
                                processed_at: Some(Utc::now()),
                                ..JobStatusUpdate::with_error(error.kind, error.message.clone())
                            },
                        )
                        .await?;
                }
                Ok(Disposition::Ack)
            }
            RecoveryAction::Ignore => {
                debug!(kind = %error.kind, message_id = %ctx.message_id, "ignoring error");
                Ok(Disposition::Ack)
            }
            RecoveryAction::Fail => {
                warn!(
                    kind = %error.kind,
                    message_id = %ctx.message_id,
                    "failing message without retry: {}",
                    error.message
                );
                if let Some(job_id) = &ctx.job_id {
                    self.jobs
                        .update_status(
                            job_id,
                            JobStatus::Failed,
                            JobStatusUpdate {
                                processed_at: Some(Utc::now()),
                                ..JobStatusUpdate::with_error(error.kind, error.message.clone())
                            },
                        )
                        .await?;
                }
                Ok(Disposition::Reject)
            }
            RecoveryAction::Dlq => self.escalate(error, ctx).await,
            RecoveryAction::Alert => {
                // Alert-only errors keep the job out of a terminal state
                // so an operator decides what happens next
                if let Some(job_id) = &ctx.job_id {
                    self.jobs
                        .annotate(
                            job_id,
                            JobStatusUpdate::with_error(error.kind, error.message.clone()),
                        )
                        .await?;
                }
                Ok(Disposition::Ack)
            }
        }
    }

    async fn handle_retry(&self, error: &SyncError, ctx: &MessageContext) -> Result<Disposition> {
        let policy = self.policies.lookup(error.kind);

        if !policy.retryable || ctx.retry_count >= policy.max_retries {
            return self.escalate(error, ctx).await;
        }

        let config = RetryConfig {
            base_delay: policy.retry_delay,
            ..self.retry.clone()
        };
        let delay = backoff_delay(ctx.retry_count, &config);

        info!(
            kind = %error.kind,
            message_id = %ctx.message_id,
            attempt = ctx.retry_count + 1,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );

        if let Some(job_id) = &ctx.job_id {
            self.jobs
                .update_status(
                    job_id,
                    JobStatus::Retry,
                    JobStatusUpdate {
                        retry_count: Some(ctx.retry_count + 1),
                        ..JobStatusUpdate::with_error(error.kind, error.message.clone())
                    },
                )
                .await?;
        }

        Ok(Disposition::Requeue { delay })
    }

    /// Park the message on the dead-letter queue and fail its job
    async fn escalate(&self, error: &SyncError, ctx: &MessageContext) -> Result<Disposition> {
        let kind = if error.action == RecoveryAction::Retry {
            ErrorKind::MaxRetriesExceeded
        } else {
            error.kind
        };

        self.dlq
            .send_to_dlq(DeadLetterRequest {
                message_id: ctx.message_id.clone(),
                payload: ctx.payload.clone(),
                queue: ctx.queue.clone(),
                error_message: error.message.clone(),
                error_type: kind,
                retry_count: ctx.retry_count,
                trace_id: Some(error.trace_id.clone()),
                job_id: ctx.job_id.clone(),
            })
            .await?;

        self.metrics.dlq_messages_total.inc();
        Ok(Disposition::Ack)
    }
}
