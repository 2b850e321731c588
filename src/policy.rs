//! Recovery policy table: the static `ErrorKind → RecoveryPolicy` mapping
//!
//! The table is data-driven and total: every declared kind has an entry,
//! and an unmapped kind resolves to the `INTERNAL_ERROR` policy. Totality
//! is enforced by [`PolicyTable::verify_complete`] at load time, not by
//! convention.

use crate::error::{ErrorKind, RecoveryAction, Severity, SyncError, generate_trace_id};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

/// Static per-kind recovery record
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Severity stamped onto errors of this kind
    pub severity: Severity,
    /// Action the recovery executor dispatches on
    pub action: RecoveryAction,
    /// Whether errors of this kind may be redelivered
    pub retryable: bool,
    /// Message-level redelivery budget before escalating to DLQ
    pub max_retries: u32,
    /// Base delay for the redelivery backoff
    pub retry_delay: Duration,
    /// Occurrence count at which alerts start firing
    pub alert_threshold: u32,
    /// Operator-facing description
    pub description: &'static str,
}

/// Error raised when the policy table does not cover the taxonomy
#[derive(Debug, Error)]
#[error("recovery policy table is missing entries for: {missing:?}")]
pub struct IncompletePolicyTable {
    pub missing: Vec<ErrorKind>,
}

/// Total mapping from error kinds to recovery policies
#[derive(Debug)]
pub struct PolicyTable {
    policies: HashMap<ErrorKind, RecoveryPolicy>,
}

impl PolicyTable {
    /// The standard policy table covering the whole taxonomy
    pub fn standard() -> Self {
        use ErrorKind::*;
        use RecoveryAction::*;
        use Severity::*;

        let secs = Duration::from_secs;
        let mut policies = HashMap::new();
        let mut insert = |kind: ErrorKind, policy: RecoveryPolicy| {
            policies.insert(kind, policy);
        };

        // Transient infrastructure: bounded retry; critical dependencies
        // alert almost immediately when unavailability persists
        insert(
            NetworkError,
            RecoveryPolicy {
                severity: Medium,
                action: Retry,
                retryable: true,
                max_retries: 3,
                retry_delay: secs(2),
                alert_threshold: 10,
                description: "generic network failure reaching a dependency",
            },
        );
        insert(
            ConnectionTimeout,
            RecoveryPolicy {
                severity: Medium,
                action: Retry,
                retryable: true,
                max_retries: 3,
                retry_delay: secs(5),
                alert_threshold: 10,
                description: "dependency did not answer within its timeout",
            },
        );
        insert(
            ConnectionRefused,
            RecoveryPolicy {
                severity: High,
                action: Retry,
                retryable: true,
                max_retries: 3,
                retry_delay: secs(5),
                alert_threshold: 5,
                description: "dependency actively refused the connection",
            },
        );
        insert(
            ElasticsearchUnavailable,
            RecoveryPolicy {
                severity: Critical,
                action: Retry,
                retryable: true,
                max_retries: 5,
                retry_delay: secs(10),
                alert_threshold: 1,
                description: "search index cluster unreachable",
            },
        );
        insert(
            RabbitmqUnavailable,
            RecoveryPolicy {
                severity: Critical,
                action: Retry,
                retryable: true,
                max_retries: 5,
                retry_delay: secs(10),
                alert_threshold: 1,
                description: "message broker unreachable",
            },
        );
        insert(
            DatabaseUnavailable,
            RecoveryPolicy {
                severity: Critical,
                action: Retry,
                retryable: true,
                max_retries: 5,
                retry_delay: secs(10),
                alert_threshold: 1,
                description: "job bookkeeping store unreachable",
            },
        );

        // Structural/config: index-not-found heals itself on recreation,
        // mapping and queue topology errors need an operator
        insert(
            IndexNotFound,
            RecoveryPolicy {
                severity: High,
                action: Retry,
                retryable: true,
                max_retries: 3,
                retry_delay: secs(5),
                alert_threshold: 3,
                description: "target index missing; retried while it is recreated",
            },
        );
        insert(
            MappingError,
            RecoveryPolicy {
                severity: High,
                action: Alert,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 1,
                description: "document rejected by index mapping; not auto-healable",
            },
        );
        insert(
            QueueNotFound,
            RecoveryPolicy {
                severity: High,
                action: Alert,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 1,
                description: "queue or exchange topology missing; not auto-healable",
            },
        );

        // Data quality: skipped, never retried
        insert(
            ValidationError,
            RecoveryPolicy {
                severity: Low,
                action: Skip,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 50,
                description: "message failed validation",
            },
        );
        insert(
            InvalidMessageFormat,
            RecoveryPolicy {
                severity: Low,
                action: Skip,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 50,
                description: "message body unparsable",
            },
        );
        insert(
            MissingField,
            RecoveryPolicy {
                severity: Low,
                action: Skip,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 50,
                description: "required field absent from message",
            },
        );
        insert(
            InvalidFieldType,
            RecoveryPolicy {
                severity: Low,
                action: Skip,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 50,
                description: "field present with the wrong type",
            },
        );

        // Business rules: idempotent no-ops except permission problems
        insert(
            RecordNotFound,
            RecoveryPolicy {
                severity: Low,
                action: Skip,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 100,
                description: "target record already gone; delete is a no-op",
            },
        );
        insert(
            RecordAlreadyExists,
            RecoveryPolicy {
                severity: Low,
                action: Skip,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 100,
                description: "record already present; insert is a no-op",
            },
        );
        insert(
            InvalidOperation,
            RecoveryPolicy {
                severity: Medium,
                action: Skip,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 25,
                description: "operation not applicable to the record state",
            },
        );
        insert(
            PermissionDenied,
            RecoveryPolicy {
                severity: High,
                action: Alert,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 1,
                description: "dependency rejected credentials",
            },
        );

        // Resource exhaustion
        insert(
            OutOfMemory,
            RecoveryPolicy {
                severity: Critical,
                action: Alert,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 1,
                description: "dependency out of memory; retrying makes it worse",
            },
        );
        insert(
            RateLimitExceeded,
            RecoveryPolicy {
                severity: Medium,
                action: Retry,
                retryable: true,
                max_retries: 5,
                retry_delay: secs(30),
                alert_threshold: 10,
                description: "throttled by a dependency; retried with a long delay",
            },
        );

        // Terminal: always quarantined
        insert(
            MaxRetriesExceeded,
            RecoveryPolicy {
                severity: High,
                action: Dlq,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 10,
                description: "redelivery budget exhausted",
            },
        );
        insert(
            RetryFailed,
            RecoveryPolicy {
                severity: High,
                action: Dlq,
                retryable: false,
                max_retries: 0,
                retry_delay: Duration::ZERO,
                alert_threshold: 10,
                description: "retry machinery itself failed",
            },
        );

        // Fallback: bounded retries, then the terminal path escalates
        insert(
            InternalError,
            RecoveryPolicy {
                severity: High,
                action: Retry,
                retryable: true,
                max_retries: 3,
                retry_delay: secs(5),
                alert_threshold: 10,
                description: "unclassified failure",
            },
        );

        Self { policies }
    }

    /// Check that every declared kind has an entry
    pub fn verify_complete(&self) -> Result<(), IncompletePolicyTable> {
        let missing: Vec<ErrorKind> = ErrorKind::ALL
            .into_iter()
            .filter(|kind| !self.policies.contains_key(kind))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(IncompletePolicyTable { missing })
        }
    }

    /// Look up the policy for a kind.
    ///
    /// Never returns nothing: an unmapped kind resolves to the
    /// `INTERNAL_ERROR` entry, which [`PolicyTable::standard`] always
    /// carries.
    pub fn lookup(&self, kind: ErrorKind) -> &RecoveryPolicy {
        self.policies.get(&kind).unwrap_or_else(|| {
            self.policies
                .get(&ErrorKind::InternalError)
                .expect("policy table must carry the INTERNAL_ERROR fallback")
        })
    }

    /// Whether `occurrences` of `kind` warrant an alert
    pub fn should_alert(&self, kind: ErrorKind, occurrences: u64) -> bool {
        occurrences >= self.lookup(kind).alert_threshold as u64
    }

    /// Build a [`SyncError`], stamping severity/action/retryable from the
    /// policy for `kind`. Supplied trace ids are preserved; otherwise a
    /// fresh one is generated.
    pub fn create_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        trace_id: Option<String>,
        context: BTreeMap<String, String>,
        retry_count: u32,
    ) -> SyncError {
        let policy = self.lookup(kind);
        SyncError {
            kind,
            severity: policy.severity,
            action: policy.action,
            retryable: policy.retryable,
            message: message.into(),
            trace_id: trace_id.unwrap_or_else(generate_trace_id),
            context,
            timestamp: Utc::now(),
            retry_count,
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}
