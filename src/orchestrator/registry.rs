//! In-memory registry of operations for one session.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::error::{OrchestratorError, OrchestratorResult};
use super::kind::{Directive, OperationKind};
use super::operation::{Failure, Operation, OperationRequest, OperationStatus};

/// Source of truth for what is running and what has run.
///
/// Holds at most `capacity` operations; when a submission goes over, the
/// oldest terminal operations are evicted. Running operations are never
/// evicted.
pub struct OperationRegistry {
    operations: DashMap<Uuid, Operation>,
    next_seq: AtomicU64,
    capacity: usize,
}

impl OperationRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            operations: DashMap::new(),
            next_seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Validate a request and register it as `pending`.
    pub fn submit(
        &self,
        request: OperationRequest,
        performed_by: &str,
    ) -> OrchestratorResult<Uuid> {
        let kind: OperationKind = request.kind.trim().parse()?;
        let target_ids = normalize_targets(request.target_ids)?;
        let now = Utc::now();
        let directive = Directive::parse(kind, &request.parameters, &target_ids, now)?;

        let label = request
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| format!("{} ({} records)", kind.title(), target_ids.len()));

        let id = Uuid::new_v4();
        let operation = Operation {
            id,
            kind,
            target_ids,
            parameters: request.parameters,
            status: OperationStatus::Pending,
            progress: 0,
            processed_count: 0,
            error_kind: None,
            error_detail: None,
            label,
            performed_by: performed_by.to_string(),
            undoable: directive.undoable(),
            created_at: now,
            completed_at: None,
            undone_at: None,
            directive,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };

        self.operations.insert(id, operation);
        self.evict_over_capacity();
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<Operation> {
        self.operations.get(&id).map(|op| op.clone())
    }

    pub fn status(&self, id: Uuid) -> Option<OperationStatus> {
        self.operations.get(&id).map(|op| op.status)
    }

    /// Record that `processed` targets have been handled.
    ///
    /// Ignored once the operation is terminal. Progress never moves backwards.
    pub fn update_progress(&self, id: Uuid, processed: usize) {
        if let Some(mut op) = self.operations.get_mut(&id) {
            if op.status.is_terminal() {
                return;
            }
            let processed = processed.max(op.processed_count);
            op.processed_count = processed;
            op.progress = Operation::progress_for(processed, op.target_ids.len());
        }
    }

    /// Move an operation to `next`, rejecting anything that breaks the
    /// pending -> processing -> terminal ordering.
    pub fn transition(
        &self,
        id: Uuid,
        next: OperationStatus,
        failure: Option<Failure>,
    ) -> OrchestratorResult<()> {
        let mut op = self
            .operations
            .get_mut(&id)
            .ok_or(OrchestratorError::NotFound(id))?;

        if !op.status.can_transition_to(next) {
            return Err(OrchestratorError::IllegalTransition {
                from: op.status,
                to: next,
            });
        }

        op.status = next;
        match next {
            OperationStatus::Completed => {
                op.processed_count = op.target_ids.len();
                op.progress = 100;
                op.completed_at = Some(Utc::now());
            }
            OperationStatus::Failed => {
                let failure = failure.unwrap_or_else(|| {
                    Failure::new(super::FailureKind::MutationFailure, "operation failed")
                });
                op.error_kind = Some(failure.kind);
                op.error_detail = Some(failure.message);
                op.completed_at = Some(Utc::now());
            }
            OperationStatus::Pending | OperationStatus::Processing => {}
        }
        Ok(())
    }

    pub fn mark_undone(&self, id: Uuid) {
        if let Some(mut op) = self.operations.get_mut(&id) {
            op.undone_at = Some(Utc::now());
        }
    }

    /// The `limit` most recently submitted operations, oldest first.
    pub fn list(&self, limit: usize) -> Vec<Operation> {
        let mut all: Vec<Operation> = self.operations.iter().map(|op| op.clone()).collect();
        all.sort_by_key(|op| op.seq);
        let skip = all.len().saturating_sub(limit);
        all.split_off(skip)
    }

    /// Forget a finished operation. Its snapshot and audit entries are
    /// untouched. Pending or processing operations stay registered.
    pub fn remove(&self, id: Uuid) -> OrchestratorResult<Operation> {
        if let Some((_, op)) = self
            .operations
            .remove_if(&id, |_, op| op.status.is_terminal())
        {
            return Ok(op);
        }
        match self.status(id) {
            Some(_) => Err(OrchestratorError::InProgress(id)),
            None => Err(OrchestratorError::NotFound(id)),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn evict_over_capacity(&self) {
        let excess = self.operations.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let mut terminal: Vec<(u64, Uuid)> = self
            .operations
            .iter()
            .filter(|op| op.status.is_terminal())
            .map(|op| (op.seq, op.id))
            .collect();
        terminal.sort_unstable();
        for (_, id) in terminal.into_iter().take(excess) {
            tracing::debug!("Evicting finished operation {} from registry", id);
            self.operations.remove(&id);
        }
    }
}

/// Trim ids, reject blanks, drop repeats keeping the first occurrence.
fn normalize_targets(target_ids: Vec<String>) -> OrchestratorResult<Vec<String>> {
    if target_ids.is_empty() {
        return Err(OrchestratorError::invalid("targetIds must not be empty"));
    }
    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(target_ids.len());
    for raw in target_ids {
        let id = raw.trim();
        if id.is_empty() {
            return Err(OrchestratorError::invalid("targetIds must not contain blank ids"));
        }
        if seen.insert(id.to_string()) {
            ordered.push(id.to_string());
        }
    }
    Ok(ordered)
}
