//! Drives one operation's per-record loop.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::audit::{AuditLogEntry, AuditSink};
use super::cancel::CancellationToken;
use super::error::{OrchestratorError, OrchestratorResult};
use super::kind::MutationRequest;
use super::locks::RecordLocks;
use super::operation::{Failure, FailureKind, OperationStatus};
use super::registry::OperationRegistry;
use super::snapshot::SnapshotStore;
use crate::domain::{EntityMutator, WriteMode};

/// Applies an operation to its targets strictly in `target_ids` order.
///
/// Fail-fast: the first record that errors or times out ends the operation
/// as `failed`, and the remaining targets are not attempted. Records
/// already mutated stay mutated.
pub struct MutationExecutor {
    registry: Arc<OperationRegistry>,
    snapshots: Arc<SnapshotStore>,
    mutator: Arc<dyn EntityMutator>,
    audit: Arc<dyn AuditSink>,
    locks: Arc<RecordLocks>,
    mutation_timeout: Duration,
    strict_audit: bool,
}

impl MutationExecutor {
    pub fn new(
        registry: Arc<OperationRegistry>,
        snapshots: Arc<SnapshotStore>,
        mutator: Arc<dyn EntityMutator>,
        audit: Arc<dyn AuditSink>,
        locks: Arc<RecordLocks>,
        mutation_timeout: Duration,
        strict_audit: bool,
    ) -> Self {
        Self {
            registry,
            snapshots,
            mutator,
            audit,
            locks,
            mutation_timeout,
            strict_audit,
        }
    }

    /// Run a `pending` operation to a terminal status and return it.
    ///
    /// Record-level problems never surface as `Err`; they end up in the
    /// operation's status and error detail. `Err` means the operation could
    /// not be started at all (unknown id, not pending).
    pub async fn run(
        &self,
        operation_id: Uuid,
        token: &CancellationToken,
    ) -> OrchestratorResult<OperationStatus> {
        let operation = self
            .registry
            .get(operation_id)
            .ok_or(OrchestratorError::NotFound(operation_id))?;

        if token.is_cancelled() {
            tracing::warn!("Operation {} cancelled before start", operation_id);
            self.settle_failed(
                operation_id,
                Failure::new(FailureKind::Cancelled, "cancelled before start"),
            );
            return Ok(OperationStatus::Failed);
        }

        self.registry
            .transition(operation_id, OperationStatus::Processing, None)?;

        let total = operation.target_ids.len();
        tracing::info!(
            "Processing operation {} ({}) over {} records",
            operation_id,
            operation.kind,
            total
        );

        for (index, target_id) in operation.target_ids.iter().enumerate() {
            if token.is_cancelled() {
                tracing::warn!(
                    "Operation {} cancelled after {} of {} records",
                    operation_id,
                    index,
                    total
                );
                self.settle_failed(
                    operation_id,
                    Failure::new(
                        FailureKind::Cancelled,
                        format!("cancelled after {} of {} records", index, total),
                    ),
                );
                return Ok(OperationStatus::Failed);
            }

            let request = operation.directive.resolve(target_id);
            if let Err(error) = self.apply(operation_id, target_id, request).await {
                tracing::error!(
                    "Operation {} failed on record {} ({} of {}): {}",
                    operation_id,
                    target_id,
                    index + 1,
                    total,
                    error
                );
                let kind = match error {
                    OrchestratorError::Timeout { .. } => FailureKind::Timeout,
                    _ => FailureKind::MutationFailure,
                };
                self.settle_failed(operation_id, Failure::new(kind, error.to_string()));
                return Ok(OperationStatus::Failed);
            }

            self.registry.update_progress(operation_id, index + 1);
        }

        let entry = AuditLogEntry::new(
            operation_id,
            operation.kind,
            total,
            operation.performed_by.clone(),
            operation.directive.audit_detail(),
        );
        if let Err(e) = self.audit.append(entry).await {
            if self.strict_audit {
                tracing::error!("Audit write failed for operation {}: {}", operation_id, e);
                self.settle_failed(
                    operation_id,
                    Failure::new(
                        FailureKind::AuditWriteFailure,
                        OrchestratorError::AuditWriteFailure(e.to_string()).to_string(),
                    ),
                );
                return Ok(OperationStatus::Failed);
            }
            tracing::warn!(
                "Audit write failed for operation {} (mutations kept): {}",
                operation_id,
                e
            );
        }

        if let Err(e) = self
            .registry
            .transition(operation_id, OperationStatus::Completed, None)
        {
            tracing::debug!("Could not mark operation {} completed: {}", operation_id, e);
        }
        tracing::info!("Operation {} completed ({} records)", operation_id, total);
        Ok(OperationStatus::Completed)
    }

    async fn apply(
        &self,
        operation_id: Uuid,
        target_id: &str,
        request: MutationRequest,
    ) -> OrchestratorResult<()> {
        if matches!(request, MutationRequest::Noop) {
            return Ok(());
        }

        let _guard = self.locks.acquire(target_id).await;
        let mutator = self.mutator.as_ref();
        let snapshots = self.snapshots.as_ref();
        let call = async move {
            match request {
                MutationRequest::Update { id, fields } => {
                    // Another operation may have written this record since capture.
                    if snapshots.contains(operation_id) {
                        let current = match mutator.read_many(std::slice::from_ref(&id)).await {
                            Ok(current) => current,
                            Err(e) => return Err(e),
                        };
                        if let Some(record) = current.into_iter().next() {
                            snapshots.refresh(operation_id, record);
                        }
                    }
                    mutator.write_one(&id, fields, WriteMode::Merge).await
                }
                MutationRequest::Insert { collection, fields } => {
                    mutator.insert_one(collection, fields).await
                }
                MutationRequest::Delete { collection, id } => {
                    mutator.delete_one(collection, &id).await
                }
                MutationRequest::Noop => Ok(()),
            }
        };

        match tokio::time::timeout(self.mutation_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(OrchestratorError::mutation(target_id, &e)),
            Err(_) => Err(OrchestratorError::Timeout {
                target_id: target_id.to_string(),
                millis: self.mutation_timeout.as_millis(),
            }),
        }
    }

    // The operation may have been dismissed from the registry mid-run.
    fn settle_failed(&self, operation_id: Uuid, failure: Failure) {
        if let Err(e) = self
            .registry
            .transition(operation_id, OperationStatus::Failed, Some(failure))
        {
            tracing::debug!("Could not mark operation {} failed: {}", operation_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::{MemoryAuditSink, MemoryMutator};
    use crate::orchestrator::OperationRequest;
    use serde_json::{Value, json};

    struct Harness {
        registry: Arc<OperationRegistry>,
        snapshots: Arc<SnapshotStore>,
        mutator: Arc<MemoryMutator>,
        audit: Arc<MemoryAuditSink>,
        executor: MutationExecutor,
    }

    fn harness(mutator: MemoryMutator, strict_audit: bool) -> Harness {
        let registry = Arc::new(OperationRegistry::new(50));
        let mutator = Arc::new(mutator);
        let audit = Arc::new(MemoryAuditSink::new());
        let snapshots = Arc::new(SnapshotStore::new(10));
        let executor = MutationExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&snapshots),
            mutator.clone(),
            audit.clone(),
            Arc::new(RecordLocks::new()),
            Duration::from_millis(200),
            strict_audit,
        );
        Harness {
            registry,
            snapshots,
            mutator,
            audit,
            executor,
        }
    }

    fn students(ids: &[&str]) -> MemoryMutator {
        MemoryMutator::with_records(
            ids.iter()
                .map(|id| (*id, json!({ "status": "active", "class_id": "C1" }))),
        )
    }

    fn submit(h: &Harness, kind: &str, targets: &[&str], parameters: Value) -> Uuid {
        h.registry
            .submit(OperationRequest::new(kind, targets, parameters), "registrar")
            .unwrap()
    }

    #[tokio::test]
    async fn status_update_completes_with_one_audit_entry() {
        let h = harness(students(&["S1", "S2"]), false);
        let id = submit(&h, "statusUpdate", &["S1", "S2"], json!({ "status": "suspended" }));

        let status = h.executor.run(id, &CancellationToken::new()).await.unwrap();
        assert_eq!(status, OperationStatus::Completed);

        for target in ["S1", "S2"] {
            let record = h.mutator.record(target).unwrap();
            assert_eq!(record.get("status"), Some(&json!("suspended")));
            assert_eq!(record.get("class_id"), Some(&json!("C1")));
        }

        let op = h.registry.get(id).unwrap();
        assert_eq!(op.progress, 100);
        assert!(op.completed_at.is_some());

        let entries = h.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item_count, 2);
        assert_eq!(entries[0].performed_by, "registrar");
        assert_eq!(entries[0].detail, json!({ "status": "suspended" }));
    }

    #[tokio::test]
    async fn failure_halts_remaining_records() {
        let mutator = students(&["a", "b", "c"]);
        mutator.fail_on("b");
        let h = harness(mutator, false);
        let id = submit(&h, "statusUpdate", &["a", "b", "c"], json!({ "status": "graduated" }));

        let status = h.executor.run(id, &CancellationToken::new()).await.unwrap();
        assert_eq!(status, OperationStatus::Failed);

        assert_eq!(h.mutator.attempts(), vec!["a", "b"]);
        assert_eq!(h.mutator.record("a").unwrap().get("status"), Some(&json!("graduated")));
        assert_eq!(h.mutator.record("c").unwrap().get("status"), Some(&json!("active")));

        let op = h.registry.get(id).unwrap();
        assert_eq!(op.progress, 33);
        assert_eq!(op.error_kind, Some(FailureKind::MutationFailure));
        assert!(op.error_detail.as_deref().unwrap().contains("b"));
        assert_eq!(op.remaining_target_ids(), ["b", "c"]);
        assert!(h.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn slow_record_is_a_timeout_failure() {
        let mutator = students(&["S1"]);
        mutator.set_delay(Duration::from_millis(500));
        let h = harness(mutator, false);
        let id = submit(&h, "toggleAccounts", &["S1"], json!({ "enabled": false }));

        let status = h.executor.run(id, &CancellationToken::new()).await.unwrap();
        assert_eq!(status, OperationStatus::Failed);
        let op = h.registry.get(id).unwrap();
        assert_eq!(op.error_kind, Some(FailureKind::Timeout));
        assert_eq!(op.progress, 0);
    }

    #[tokio::test]
    async fn cancelled_token_fails_before_any_mutation() {
        let h = harness(students(&["S1", "S2"]), false);
        let id = submit(&h, "statusUpdate", &["S1", "S2"], json!({ "status": "suspended" }));
        let token = CancellationToken::new();
        token.cancel();

        let status = h.executor.run(id, &token).await.unwrap();
        assert_eq!(status, OperationStatus::Failed);
        assert!(h.mutator.attempts().is_empty());
        assert_eq!(h.registry.get(id).unwrap().error_kind, Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn audit_failure_is_swallowed_by_default() {
        let h = harness(students(&["S1"]), false);
        h.audit.set_failing(true);
        let id = submit(&h, "statusUpdate", &["S1"], json!({ "status": "suspended" }));

        let status = h.executor.run(id, &CancellationToken::new()).await.unwrap();
        assert_eq!(status, OperationStatus::Completed);
        assert_eq!(h.registry.get(id).unwrap().progress, 100);
    }

    #[tokio::test]
    async fn strict_audit_fails_the_operation() {
        let h = harness(students(&["S1"]), true);
        h.audit.set_failing(true);
        let id = submit(&h, "statusUpdate", &["S1"], json!({ "status": "suspended" }));

        let status = h.executor.run(id, &CancellationToken::new()).await.unwrap();
        assert_eq!(status, OperationStatus::Failed);
        let op = h.registry.get(id).unwrap();
        assert_eq!(op.error_kind, Some(FailureKind::AuditWriteFailure));
        // The mutation itself was applied and stays applied.
        assert_eq!(h.mutator.record("S1").unwrap().get("status"), Some(&json!("suspended")));
    }

    #[tokio::test]
    async fn notifications_insert_one_row_per_target() {
        let h = harness(students(&["S1", "S2"]), false);
        let id = submit(
            &h,
            "sendNotification",
            &["S1", "S2"],
            json!({ "title": "Trip", "message": "Bring a hat" }),
        );

        h.executor.run(id, &CancellationToken::new()).await.unwrap();

        let rows = h.mutator.entries(crate::domain::Collection::Notifications);
        let recipients: Vec<&Value> = rows.iter().filter_map(|r| r.get("record_id")).collect();
        assert_eq!(recipients, vec![&json!("S1"), &json!("S2")]);
    }

    #[tokio::test]
    async fn hard_delete_removes_records() {
        let h = harness(students(&["S1", "S2"]), false);
        let id = submit(&h, "archiveOrDelete", &["S1"], json!({ "mode": "delete" }));

        let status = h.executor.run(id, &CancellationToken::new()).await.unwrap();
        assert_eq!(status, OperationStatus::Completed);
        assert!(h.mutator.record("S1").is_none());
        assert!(h.mutator.record("S2").is_some());
    }

    #[tokio::test]
    async fn copy_data_counts_records_without_touching_them() {
        let h = harness(students(&["S1", "S2"]), false);
        let id = submit(&h, "copyData", &["S1", "S2"], Value::Null);

        let status = h.executor.run(id, &CancellationToken::new()).await.unwrap();
        assert_eq!(status, OperationStatus::Completed);
        assert!(h.mutator.attempts().is_empty());
        assert_eq!(h.audit.entries()[0].item_count, 2);
    }

    #[tokio::test]
    async fn snapshot_tracks_writes_made_after_capture() {
        let h = harness(students(&["S1", "S2"]), false);
        let id = submit(&h, "transfer", &["S1", "S2"], json!({ "classId": "C9" }));
        let targets = vec!["S1".to_string(), "S2".to_string()];
        h.snapshots
            .capture(
                h.mutator.as_ref(),
                id,
                crate::orchestrator::OperationKind::Transfer,
                &targets,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        // Lands between capture and this operation's own write.
        let mut status = crate::domain::FieldMap::new();
        status.insert("status".into(), json!("suspended"));
        h.mutator.write_one("S2", status, WriteMode::Merge).await.unwrap();

        h.executor.run(id, &CancellationToken::new()).await.unwrap();

        let snapshot = h.snapshots.get(id).unwrap();
        assert_eq!(snapshot.prior_records[0].field("status"), Some(&json!("active")));
        assert_eq!(snapshot.prior_records[1].field("status"), Some(&json!("suspended")));
        assert_eq!(snapshot.prior_records[1].field("class_id"), Some(&json!("C1")));
    }

    #[tokio::test]
    async fn running_twice_is_an_illegal_transition() {
        let h = harness(students(&["S1"]), false);
        let id = submit(&h, "statusUpdate", &["S1"], json!({ "status": "suspended" }));
        h.executor.run(id, &CancellationToken::new()).await.unwrap();

        let err = h.executor.run(id, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalTransition { .. }));
        assert_eq!(h.audit.entries().len(), 1);
    }
}
