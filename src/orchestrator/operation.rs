//! Operation records and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::kind::{Directive, OperationKind};

/// Body of a submission: `{kind, targetIds, parameters, label?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub kind: String,
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub label: Option<String>,
}

impl OperationRequest {
    pub fn new(kind: impl Into<String>, target_ids: &[&str], parameters: Value) -> Self {
        Self {
            kind: kind.into(),
            target_ids: target_ids.iter().map(|id| id.to_string()).collect(),
            parameters,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }

    /// pending -> processing -> {completed | failed}, plus pending -> failed
    /// for operations that never got to start.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (OperationStatus::Pending, OperationStatus::Processing)
                | (OperationStatus::Pending, OperationStatus::Failed)
                | (OperationStatus::Processing, OperationStatus::Completed)
                | (OperationStatus::Processing, OperationStatus::Failed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why an operation ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    MutationFailure,
    Timeout,
    SnapshotCaptureFailure,
    AuditWriteFailure,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub target_ids: Vec<String>,
    pub parameters: Value,
    pub status: OperationStatus,
    pub progress: u8,
    pub processed_count: usize,
    pub error_kind: Option<FailureKind>,
    pub error_detail: Option<String>,
    pub label: String,
    pub performed_by: String,
    pub undoable: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub undone_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub directive: Directive,
    /// Submission order within the registry.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Operation {
    /// `round(100 * processed / total)`.
    pub fn progress_for(processed: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        let pct = (processed.min(total) as f64 * 100.0 / total as f64).round();
        pct as u8
    }

    /// Target ids that were never reached. Empty for completed operations.
    pub fn remaining_target_ids(&self) -> &[String] {
        let processed = self.processed_count.min(self.target_ids.len());
        &self.target_ids[processed..]
    }
}
