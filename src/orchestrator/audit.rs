//! Audit trail written by the executor and the undo controller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::kind::OperationKind;
use crate::domain::DomainError;

/// Immutable record of what an operation did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub item_count: usize,
    pub performed_by: String,
    pub detail: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        operation_id: Uuid,
        kind: OperationKind,
        item_count: usize,
        performed_by: impl Into<String>,
        detail: Value,
    ) -> Self {
        Self {
            operation_id,
            kind,
            item_count,
            performed_by: performed_by.into(),
            detail,
            timestamp: Utc::now(),
        }
    }

    pub fn is_undo(&self) -> bool {
        self.detail.get("undo").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Append-only durable storage for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), DomainError>;

    /// The `limit` newest entries, newest first.
    async fn recent(&self, limit: u64) -> Result<Vec<AuditLogEntry>, DomainError>;
}
