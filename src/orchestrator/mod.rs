//! Bulk mutation orchestrator
//!
//! Applies one change across a set of target records while tracking
//! progress, keeping a pre-change snapshot for undo, and writing an audit
//! trail. All state is owned by an [`Orchestrator`] instance created at
//! service start and injected where it is needed.

pub mod audit;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod kind;
pub mod locks;
pub mod operation;
pub mod registry;
pub mod snapshot;
pub mod undo;

pub use audit::{AuditLogEntry, AuditSink};
pub use cancel::CancellationToken;
pub use error::{OrchestratorError, OrchestratorResult};
pub use executor::MutationExecutor;
pub use kind::{Directive, MutationRequest, OperationKind};
pub use locks::RecordLocks;
pub use operation::{Failure, FailureKind, Operation, OperationRequest, OperationStatus};
pub use registry::OperationRegistry;
pub use snapshot::{Snapshot, SnapshotStore};
pub use undo::UndoController;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::EntityMutator;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Upper bound on each record store call.
    pub mutation_timeout: Duration,
    /// Fail an otherwise successful operation when its audit write fails.
    pub strict_audit: bool,
    pub registry_capacity: usize,
    /// Undo snapshots kept before the oldest are dropped.
    pub snapshot_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            mutation_timeout: Duration::from_secs(5),
            strict_audit: false,
            registry_capacity: 500,
            snapshot_capacity: 500,
        }
    }
}

/// Entry point used by the HTTP layer and by embedders.
///
/// Cloning is cheap; clones share the same registry and snapshot store.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<OperationRegistry>,
    snapshots: Arc<SnapshotStore>,
    executor: Arc<MutationExecutor>,
    undo: Arc<UndoController>,
    mutator: Arc<dyn EntityMutator>,
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        mutator: Arc<dyn EntityMutator>,
        audit: Arc<dyn AuditSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let registry = Arc::new(OperationRegistry::new(settings.registry_capacity));
        let snapshots = Arc::new(SnapshotStore::new(settings.snapshot_capacity));
        let locks = Arc::new(RecordLocks::new());

        let executor = Arc::new(MutationExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&snapshots),
            Arc::clone(&mutator),
            Arc::clone(&audit),
            Arc::clone(&locks),
            settings.mutation_timeout,
            settings.strict_audit,
        ));
        let undo = Arc::new(UndoController::new(
            Arc::clone(&registry),
            Arc::clone(&snapshots),
            Arc::clone(&mutator),
            audit,
            locks,
            settings.mutation_timeout,
        ));

        Self {
            registry,
            snapshots,
            executor,
            undo,
            mutator,
            tokens: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Register the operation and start it on a background task.
    pub fn submit(
        &self,
        request: OperationRequest,
        performed_by: &str,
    ) -> OrchestratorResult<Uuid> {
        let id = self.register(request, performed_by)?;
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(id).await;
        });
        Ok(id)
    }

    /// Register the operation and run it to a terminal status before
    /// returning its final state.
    pub async fn submit_and_wait(
        &self,
        request: OperationRequest,
        performed_by: &str,
    ) -> OrchestratorResult<Operation> {
        let id = self.register(request, performed_by)?;
        self.drive(id).await;
        self.registry.get(id).ok_or(OrchestratorError::NotFound(id))
    }

    pub fn get(&self, id: Uuid) -> Option<Operation> {
        self.registry.get(id)
    }

    pub fn list(&self, limit: usize) -> Vec<Operation> {
        self.registry.list(limit)
    }

    /// Dismiss a finished operation. Its snapshot and audit entries survive.
    /// Running operations cannot be dismissed, so `undo` and `cancel` always
    /// see their live status.
    pub fn remove(&self, id: Uuid) -> OrchestratorResult<Operation> {
        self.registry.remove(id)
    }

    /// Ask a pending or running operation to stop before its next record.
    pub fn cancel(&self, id: Uuid) -> OrchestratorResult<()> {
        let status = self
            .registry
            .status(id)
            .ok_or(OrchestratorError::NotFound(id))?;
        if status.is_terminal() {
            return Err(OrchestratorError::IllegalTransition {
                from: status,
                to: OperationStatus::Failed,
            });
        }
        if let Some(token) = self.tokens.get(&id) {
            token.cancel();
        }
        tracing::info!("Cancellation requested for operation {}", id);
        Ok(())
    }

    pub async fn undo(&self, id: Uuid, performed_by: &str) -> OrchestratorResult<usize> {
        self.undo.undo(id, performed_by).await
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Snapshot> {
        self.snapshots.get(id)
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    fn register(&self, request: OperationRequest, performed_by: &str) -> OrchestratorResult<Uuid> {
        let id = self.registry.submit(request, performed_by)?;
        self.tokens.insert(id, CancellationToken::new());
        if let Some(op) = self.registry.get(id) {
            tracing::info!(
                "Submitted operation {} ({}, {} records) by {}",
                id,
                op.kind,
                op.target_ids.len(),
                performed_by
            );
        }
        Ok(id)
    }

    /// Capture (for undoable kinds), then execute.
    async fn drive(&self, id: Uuid) {
        let token = self
            .tokens
            .get(&id)
            .map(|t| t.clone())
            .unwrap_or_default();

        if let Some(op) = self.registry.get(id)
            && op.undoable
            && !token.is_cancelled()
        {
            let captured = self
                .snapshots
                .capture(
                    self.mutator.as_ref(),
                    id,
                    op.kind,
                    &op.target_ids,
                    self.settings.mutation_timeout,
                )
                .await;
            if let Err(e) = captured {
                tracing::error!("Operation {} not started: {}", id, e);
                if let Err(e) = self.registry.transition(
                    id,
                    OperationStatus::Failed,
                    Some(Failure::new(FailureKind::SnapshotCaptureFailure, e.to_string())),
                ) {
                    tracing::debug!("Could not mark operation {} failed: {}", id, e);
                }
                self.tokens.remove(&id);
                return;
            }
        }

        if let Err(e) = self.executor.run(id, &token).await {
            tracing::error!("Operation {} could not run: {}", id, e);
        }
        self.tokens.remove(&id);
    }
}
