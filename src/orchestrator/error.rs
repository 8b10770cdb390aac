//! Orchestrator error types.

use thiserror::Error;
use uuid::Uuid;

use super::operation::OperationStatus;
use crate::domain::DomainError;

/// Result type for orchestrator calls.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors raised by the bulk mutation orchestrator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    #[error("Invalid operation request: {0}")]
    InvalidOperationRequest(String),

    #[error("Mutation failed for record {target_id}: {cause}")]
    MutationFailure { target_id: String, cause: String },

    #[error("Snapshot capture failed: {0}")]
    SnapshotCaptureFailure(String),

    #[error("No snapshot retained for operation {0}")]
    NoSnapshot(Uuid),

    #[error("Audit write failed: {0}")]
    AuditWriteFailure(String),

    #[error("Record {target_id} timed out after {millis} ms")]
    Timeout { target_id: String, millis: u128 },

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Operation not found: {0}")]
    NotFound(Uuid),

    #[error("Operation {0} is still running")]
    InProgress(Uuid),
}

impl OrchestratorError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        OrchestratorError::InvalidOperationRequest(msg.into())
    }

    pub fn mutation(target_id: &str, cause: &DomainError) -> Self {
        OrchestratorError::MutationFailure {
            target_id: target_id.to_string(),
            cause: cause.to_string(),
        }
    }
}
