//! Sync job model and storage abstraction
//!
//! Every inbound sync command is tracked as a job row keyed by record id.
//! Job rows carry the lifecycle status, error annotations, retry count and
//! trace id, and are the source of truth for dead-letter statistics.

use crate::error::ErrorKind;
use crate::message::SyncOperation;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retry => "retry",
            JobStatus::Skipped => "skipped",
        }
    }

    /// Terminal statuses are never transitioned out of by the consumer
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }

    pub fn all() -> [JobStatus; 6] {
        [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Retry,
            JobStatus::Skipped,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retry" => Ok(JobStatus::Retry),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(anyhow::anyhow!("unknown job status: {other}")),
        }
    }
}

/// A tracked sync job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub record_id: String,
    pub operation: SyncOperation,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub error_type: Option<ErrorKind>,
    pub retry_count: u32,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: impl Into<String>, record_id: impl Into<String>, operation: SyncOperation) -> Self {
        Self {
            id: id.into(),
            record_id: record_id.into(),
            operation,
            status: JobStatus::Pending,
            error_message: None,
            error_type: None,
            retry_count: 0,
            trace_id: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Partial update applied alongside a status transition or annotation.
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobStatusUpdate {
    pub error_message: Option<String>,
    pub error_type: Option<ErrorKind>,
    pub retry_count: Option<u32>,
    pub trace_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl JobStatusUpdate {
    pub fn with_error(error_type: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            error_type: Some(error_type),
            ..Default::default()
        }
    }
}

/// Persistence boundary for sync jobs.
///
/// Jobs are created by the upstream producer before the message is
/// enqueued; the engine only reads and transitions them. The engine never
/// assumes a particular backing store; a relational table and an
/// in-memory map both satisfy this.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Most recent non-terminal job for a record, if any
    async fn find_job_for_record(&self, record_id: &str) -> Result<Option<String>>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Transition a job's status, applying any annotations in `update`
    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: JobStatusUpdate,
    ) -> Result<()>;

    /// Apply annotations without changing status (alert bookkeeping)
    async fn annotate(&self, job_id: &str, update: JobStatusUpdate) -> Result<()>;

    /// Count of jobs per status, for health reporting
    async fn status_counts(&self) -> Result<HashMap<JobStatus, u64>>;

    /// All failed jobs, newest first
    async fn failed_jobs(&self) -> Result<Vec<Job>>;

    /// Cheap liveness probe against the backing store
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in JobStatus::all() {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status() {
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Retry.is_terminal());
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new("job-1", "rec-1", SyncOperation::Insert);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.error_message.is_none());
        assert!(job.processed_at.is_none());
    }

    #[test]
    fn test_update_with_error() {
        let update = JobStatusUpdate::with_error(ErrorKind::NetworkError, "boom");
        assert_eq!(update.error_type, Some(ErrorKind::NetworkError));
        assert_eq!(update.error_message.as_deref(), Some("boom"));
        assert!(update.retry_count.is_none());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&JobStatus::Retry).unwrap();
        assert_eq!(json, "\"retry\"");
        let back: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobStatus::Retry);
    }
}
