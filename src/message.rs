//! Message ingress: decoding and validating inbound queue payloads
//!
//! One queue carries two distinct shapes: full sync commands (tagged
//! `"type": "ELASTICSEARCH_SYNC"`) and status-change markers the engine
//! deliberately ignores. Decoding returns a tagged variant rather than
//! inferring the shape per field access, and validation is all-or-nothing:
//! the result is either a fully validated command or a classified decode
//! error. No job state is touched on the failure path.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Mutation operation carried by a sync command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncOperation {
    Insert,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Insert => "INSERT",
            SyncOperation::Update => "UPDATE",
            SyncOperation::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(SyncOperation::Insert),
            "UPDATE" => Some(SyncOperation::Update),
            "DELETE" => Some(SyncOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully validated sync command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCommand {
    pub operation: SyncOperation,
    pub table: String,
    pub record_id: String,
    /// Full new-state payload for INSERT/UPDATE (last-write-wins)
    pub change_data: Value,
    pub message_id: String,
    /// Producer timestamp, passed through verbatim
    pub timestamp: Option<String>,
}

/// Decoded inbound message: a command to apply, or a marker to ignore
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Validated sync command
    Sync(SyncCommand),
    /// Status-change marker sharing the queue; logged and acknowledged
    /// without invoking any downstream logic
    StatusChange { listing_id: String, status: String },
}

/// Decode/validation failure, one variant per classification
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid message format: {0}")]
    Parse(String),

    #[error("invalid message format: unrecognized message shape")]
    UnknownShape,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field type: {field} must be {expected}")]
    InvalidFieldType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("validation failed: unsupported operation {0:?}")]
    UnsupportedOperation(String),

    #[error("validation failed: unexpected table {actual:?}, expected {expected:?}")]
    UnexpectedTable { expected: String, actual: String },
}

impl DecodeError {
    /// Classification for this failure; decode errors are never retryable
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::Parse(_) | DecodeError::UnknownShape => ErrorKind::InvalidMessageFormat,
            DecodeError::MissingField(_) => ErrorKind::MissingField,
            DecodeError::InvalidFieldType { .. } => ErrorKind::InvalidFieldType,
            DecodeError::UnsupportedOperation(_) | DecodeError::UnexpectedTable { .. } => {
                ErrorKind::ValidationError
            }
        }
    }

    /// True for payloads that never parsed at all, which are rejected
    /// outright rather than routed through recovery
    pub fn is_unparsable(&self) -> bool {
        matches!(self, DecodeError::Parse(_) | DecodeError::UnknownShape)
    }
}

/// Decoder/validator for the shared sync queue
#[derive(Debug, Clone)]
pub struct MessageValidator {
    expected_table: String,
}

impl MessageValidator {
    pub fn new(expected_table: impl Into<String>) -> Self {
        Self {
            expected_table: expected_table.into(),
        }
    }

    /// Decode a raw payload into a tagged, validated message.
    ///
    /// Never partially validates: every check runs before a command is
    /// returned.
    pub fn decode(&self, payload: &[u8]) -> Result<InboundMessage, DecodeError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Parse(e.to_string()))?;

        let object = value.as_object().ok_or(DecodeError::UnknownShape)?;

        if object.get("type").and_then(Value::as_str) == Some("ELASTICSEARCH_SYNC") {
            return self.decode_sync(object).map(InboundMessage::Sync);
        }

        // Status-change markers carry listingId + status and nothing the
        // sync path cares about
        if let (Some(listing_id), Some(status)) = (
            object.get("listingId").and_then(Value::as_str),
            object.get("status").and_then(Value::as_str),
        ) {
            return Ok(InboundMessage::StatusChange {
                listing_id: listing_id.to_string(),
                status: status.to_string(),
            });
        }

        Err(DecodeError::UnknownShape)
    }

    fn decode_sync(
        &self,
        object: &serde_json::Map<String, Value>,
    ) -> Result<SyncCommand, DecodeError> {
        let operation_raw = match object.get("operation") {
            None | Some(Value::Null) => return Err(DecodeError::MissingField("operation")),
            Some(Value::String(s)) => s.as_str(),
            Some(_) => {
                return Err(DecodeError::InvalidFieldType {
                    field: "operation",
                    expected: "string",
                })
            }
        };
        let operation = SyncOperation::parse(operation_raw)
            .ok_or_else(|| DecodeError::UnsupportedOperation(operation_raw.to_string()))?;

        let table = match object.get("table") {
            None | Some(Value::Null) => return Err(DecodeError::MissingField("table")),
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(DecodeError::InvalidFieldType {
                    field: "table",
                    expected: "string",
                })
            }
        };
        if table != self.expected_table {
            return Err(DecodeError::UnexpectedTable {
                expected: self.expected_table.clone(),
                actual: table,
            });
        }

        let record_id = match object.get("recordId") {
            None | Some(Value::Null) => return Err(DecodeError::MissingField("recordId")),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) => return Err(DecodeError::MissingField("recordId")),
            Some(_) => {
                return Err(DecodeError::InvalidFieldType {
                    field: "recordId",
                    expected: "string",
                })
            }
        };

        let change_data = match object.get("changeData") {
            None | Some(Value::Null) => return Err(DecodeError::MissingField("changeData")),
            Some(v) => v.clone(),
        };

        let message_id = object
            .get("messageId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(SyncCommand {
            operation,
            table,
            record_id,
            change_data,
            message_id,
            timestamp,
        })
    }
}
