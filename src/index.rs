//! Search index boundary
//!
//! The engine talks to the search backend through this narrow trait so the
//! consumer, recovery and health layers stay independent of any particular
//! client crate. Applications are idempotent: INSERT and UPDATE both write
//! the full document state, DELETE of a missing document succeeds.

use crate::message::SyncOperation;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reported health of the index backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHealth {
    /// Backend cluster status string, e.g. "green"
    pub status: String,
    pub doc_count: u64,
    pub size_bytes: u64,
}

/// A single operation within a bulk request
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    Index { id: String, document: Value },
    Delete { id: String },
}

impl BulkOp {
    pub fn from_command(operation: SyncOperation, id: String, document: Value) -> Self {
        match operation {
            SyncOperation::Insert | SyncOperation::Update => BulkOp::Index { id, document },
            SyncOperation::Delete => BulkOp::Delete { id },
        }
    }
}

/// Search index client boundary
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Write a document, replacing any existing state (upsert semantics)
    async fn index_document(&self, id: &str, document: &Value) -> Result<()>;

    /// Update a document with full new state; equivalent to indexing
    async fn update_document(&self, id: &str, document: &Value) -> Result<()>;

    /// Delete a document; deleting a missing id is not an error
    async fn delete_document(&self, id: &str) -> Result<()>;

    /// Apply a batch of operations in order
    async fn bulk(&self, ops: &[BulkOp]) -> Result<()>;

    /// Probe backend health
    async fn health(&self) -> Result<IndexHealth>;
}

/// Apply a single decoded operation against the index
pub async fn apply_operation(
    index: &dyn SearchIndex,
    operation: SyncOperation,
    record_id: &str,
    change_data: &Value,
) -> Result<()> {
    match operation {
        SyncOperation::Insert => index.index_document(record_id, change_data).await,
        SyncOperation::Update => index.update_document(record_id, change_data).await,
        SyncOperation::Delete => index.delete_document(record_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bulk_op_mapping() {
        let doc = json!({ "a": 1 });
        assert!(matches!(
            BulkOp::from_command(SyncOperation::Insert, "x".into(), doc.clone()),
            BulkOp::Index { .. }
        ));
        assert!(matches!(
            BulkOp::from_command(SyncOperation::Update, "x".into(), doc.clone()),
            BulkOp::Index { .. }
        ));
        assert!(matches!(
            BulkOp::from_command(SyncOperation::Delete, "x".into(), doc),
            BulkOp::Delete { .. }
        ));
    }
}
