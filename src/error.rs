//! Typed sync errors and the closed error taxonomy
//!
//! Every raw failure is classified exactly once, at the point it is
//! caught, into a [`SyncError`]: an immutable record carrying the error
//! kind, the severity/action/retryable verdict stamped from the recovery
//! policy table, a trace id, and diagnostic context. The typed error is
//! then threaded through the retry/alert/DLQ decision without
//! re-classification.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed taxonomy of sync failure kinds.
///
/// Every kind has exactly one entry in the recovery policy table;
/// unclassified failures resolve to [`ErrorKind::InternalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Transient infrastructure
    NetworkError,
    ConnectionTimeout,
    ConnectionRefused,
    ElasticsearchUnavailable,
    RabbitmqUnavailable,
    DatabaseUnavailable,

    // Structural / configuration
    IndexNotFound,
    MappingError,
    QueueNotFound,

    // Data quality
    ValidationError,
    InvalidMessageFormat,
    MissingField,
    InvalidFieldType,

    // Business rules
    RecordNotFound,
    RecordAlreadyExists,
    InvalidOperation,
    PermissionDenied,

    // Resource exhaustion
    OutOfMemory,
    RateLimitExceeded,

    // Terminal
    MaxRetriesExceeded,
    RetryFailed,

    // Fallback for anything unclassified
    InternalError,
}

impl ErrorKind {
    /// Every declared kind, used by the policy completeness check
    pub const ALL: [ErrorKind; 22] = [
        ErrorKind::NetworkError,
        ErrorKind::ConnectionTimeout,
        ErrorKind::ConnectionRefused,
        ErrorKind::ElasticsearchUnavailable,
        ErrorKind::RabbitmqUnavailable,
        ErrorKind::DatabaseUnavailable,
        ErrorKind::IndexNotFound,
        ErrorKind::MappingError,
        ErrorKind::QueueNotFound,
        ErrorKind::ValidationError,
        ErrorKind::InvalidMessageFormat,
        ErrorKind::MissingField,
        ErrorKind::InvalidFieldType,
        ErrorKind::RecordNotFound,
        ErrorKind::RecordAlreadyExists,
        ErrorKind::InvalidOperation,
        ErrorKind::PermissionDenied,
        ErrorKind::OutOfMemory,
        ErrorKind::RateLimitExceeded,
        ErrorKind::MaxRetriesExceeded,
        ErrorKind::RetryFailed,
        ErrorKind::InternalError,
    ];

    /// Stable SCREAMING_SNAKE_CASE name, used on job records and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorKind::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorKind::ElasticsearchUnavailable => "ELASTICSEARCH_UNAVAILABLE",
            ErrorKind::RabbitmqUnavailable => "RABBITMQ_UNAVAILABLE",
            ErrorKind::DatabaseUnavailable => "DATABASE_UNAVAILABLE",
            ErrorKind::IndexNotFound => "INDEX_NOT_FOUND",
            ErrorKind::MappingError => "MAPPING_ERROR",
            ErrorKind::QueueNotFound => "QUEUE_NOT_FOUND",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::InvalidMessageFormat => "INVALID_MESSAGE_FORMAT",
            ErrorKind::MissingField => "MISSING_FIELD",
            ErrorKind::InvalidFieldType => "INVALID_FIELD_TYPE",
            ErrorKind::RecordNotFound => "RECORD_NOT_FOUND",
            ErrorKind::RecordAlreadyExists => "RECORD_ALREADY_EXISTS",
            ErrorKind::InvalidOperation => "INVALID_OPERATION",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::OutOfMemory => "OUT_OF_MEMORY",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorKind::RetryFailed => "RETRY_FAILED",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery action prescribed by the policy table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    /// Redeliver with bounded backoff, escalating to Dlq on exhaustion
    Retry,
    /// Mark the job skipped and acknowledge; no escalation
    Skip,
    /// Mark the job failed and reject without requeue
    Fail,
    /// Quarantine in the dead-letter queue, then mark the job failed
    Dlq,
    /// Emit a throttled alert and acknowledge
    Alert,
    /// Acknowledge with a debug log only; no state change
    Ignore,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::Skip => "skip",
            RecoveryAction::Fail => "fail",
            RecoveryAction::Dlq => "dlq",
            RecoveryAction::Alert => "alert",
            RecoveryAction::Ignore => "ignore",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified sync failure.
///
/// Created once per raw failure at the classification boundary and
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct SyncError {
    /// Classified kind from the closed taxonomy
    pub kind: ErrorKind,
    /// Severity stamped from the policy table
    pub severity: Severity,
    /// Recovery action stamped from the policy table
    pub action: RecoveryAction,
    /// Whether the policy judges this kind retryable
    pub retryable: bool,
    /// Raw failure text preserved for diagnostics
    pub message: String,
    /// Correlation id (32-char hex), generated if the failure carried none
    pub trace_id: String,
    /// Key-value diagnostic context (record id, operation, queue, ...)
    pub context: BTreeMap<String, String>,
    /// When the error was classified
    pub timestamp: DateTime<Utc>,
    /// Retry count of the in-flight job at classification time
    pub retry_count: u32,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for SyncError {}

/// Generate a 32-char hex trace id (128-bit)
pub fn generate_trace_id() -> String {
    let mut rng = rand::rng();
    let hi: u64 = rng.random();
    let lo: u64 = rng.random();
    format!("{hi:016x}{lo:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_every_kind() {
        // ALL must be duplicate-free and sized to the taxonomy
        let mut seen = std::collections::HashSet::new();
        for kind in ErrorKind::ALL {
            assert!(seen.insert(kind), "duplicate kind in ALL: {kind}");
        }
        assert_eq!(seen.len(), 22);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NetworkError.to_string(), "NETWORK_ERROR");
        assert_eq!(ErrorKind::InternalError.to_string(), "INTERNAL_ERROR");
        assert_eq!(ErrorKind::RateLimitExceeded.as_str(), "RATE_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(RecoveryAction::Dlq.as_str(), "dlq");
        assert_eq!(RecoveryAction::Retry.to_string(), "retry");
    }

    #[test]
    fn test_trace_id_shape() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_trace_id());
    }

    #[test]
    fn test_kind_serde_round_trip() {
        let json = serde_json::to_string(&ErrorKind::IndexNotFound).unwrap();
        assert_eq!(json, "\"INDEX_NOT_FOUND\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::IndexNotFound);
    }
}
