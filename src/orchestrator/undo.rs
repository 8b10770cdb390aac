//! Restores an operation's targets from its snapshot.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::audit::{AuditLogEntry, AuditSink};
use super::error::{OrchestratorError, OrchestratorResult};
use super::locks::RecordLocks;
use super::registry::OperationRegistry;
use super::snapshot::SnapshotStore;
use crate::domain::{EntityMutator, WriteMode};

pub struct UndoController {
    registry: Arc<OperationRegistry>,
    snapshots: Arc<SnapshotStore>,
    mutator: Arc<dyn EntityMutator>,
    audit: Arc<dyn AuditSink>,
    locks: Arc<RecordLocks>,
    mutation_timeout: Duration,
}

impl UndoController {
    pub fn new(
        registry: Arc<OperationRegistry>,
        snapshots: Arc<SnapshotStore>,
        mutator: Arc<dyn EntityMutator>,
        audit: Arc<dyn AuditSink>,
        locks: Arc<RecordLocks>,
        mutation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            snapshots,
            mutator,
            audit,
            locks,
            mutation_timeout,
        }
    }

    /// Overwrite every target with its full prior state and retire the
    /// snapshot. Returns the number of records restored.
    ///
    /// The operation's status is left as it was. If a restore write fails
    /// part-way, the snapshot is put back so the undo can be retried: every
    /// write is a full overwrite, so repeating the already-restored ones is
    /// harmless.
    pub async fn undo(&self, operation_id: Uuid, performed_by: &str) -> OrchestratorResult<usize> {
        if let Some(status) = self.registry.status(operation_id)
            && !status.is_terminal()
        {
            return Err(OrchestratorError::InProgress(operation_id));
        }

        let snapshot = self
            .snapshots
            .consume(operation_id)
            .ok_or(OrchestratorError::NoSnapshot(operation_id))?;

        let total = snapshot.prior_records.len();
        let mut failure = None;
        for (index, record) in snapshot.prior_records.iter().enumerate() {
            let _guard = self.locks.acquire(&record.id).await;
            let write = self
                .mutator
                .write_one(&record.id, record.fields.clone(), WriteMode::Replace);

            let outcome = match tokio::time::timeout(self.mutation_timeout, write).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(OrchestratorError::mutation(&record.id, &e)),
                Err(_) => Err(OrchestratorError::Timeout {
                    target_id: record.id.clone(),
                    millis: self.mutation_timeout.as_millis(),
                }),
            };
            if let Err(error) = outcome {
                failure = Some((index, error));
                break;
            }
        }

        if let Some((restored, error)) = failure {
            tracing::error!(
                "Undo of operation {} stopped after {} of {} records: {}",
                operation_id,
                restored,
                total,
                error
            );
            self.snapshots.reinstate(snapshot);
            return Err(error);
        }

        let entry = AuditLogEntry::new(
            operation_id,
            snapshot.kind,
            total,
            performed_by,
            json!({ "undo": true, "restored": snapshot.target_ids }),
        );
        if let Err(e) = self.audit.append(entry).await {
            tracing::warn!("Audit write failed for undo of {}: {}", operation_id, e);
        }

        self.registry.mark_undone(operation_id);
        tracing::info!("Operation {} undone ({} records restored)", operation_id, total);
        Ok(total)
    }
}
