//! Pre-mutation snapshots, keyed by operation id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::error::{OrchestratorError, OrchestratorResult};
use super::kind::OperationKind;
use crate::domain::{EntityMutator, Record};

/// Prior state of every target of one operation, in target order.
///
/// Taken before the first write, then refreshed record by record under the
/// record lock just before that record is written. A record the operation
/// never reached keeps its capture-time state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub target_ids: Vec<String>,
    pub prior_records: Vec<Record>,
    pub captured_at: DateTime<Utc>,
    #[serde(skip)]
    seq: u64,
}

/// At most one live snapshot per operation. A snapshot is single-use:
/// [`SnapshotStore::consume`] hands it out and deletes it in one step.
///
/// Holds at most `capacity` snapshots. Past that, the oldest are dropped
/// and undo of those operations reports `NoSnapshot`.
pub struct SnapshotStore {
    snapshots: DashMap<Uuid, Snapshot>,
    next_seq: AtomicU64,
    capacity: usize,
}

impl SnapshotStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: DashMap::new(),
            next_seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Read every target through the record store and keep the copies.
    ///
    /// Fails without storing anything if the read fails, times out, or any
    /// target does not exist.
    pub async fn capture(
        &self,
        mutator: &dyn EntityMutator,
        operation_id: Uuid,
        kind: OperationKind,
        target_ids: &[String],
        timeout: Duration,
    ) -> OrchestratorResult<()> {
        if self.snapshots.contains_key(&operation_id) {
            return Err(OrchestratorError::SnapshotCaptureFailure(format!(
                "operation {} already has a snapshot",
                operation_id
            )));
        }

        let records = tokio::time::timeout(timeout, mutator.read_many(target_ids))
            .await
            .map_err(|_| {
                OrchestratorError::SnapshotCaptureFailure(format!(
                    "reading {} records timed out after {} ms",
                    target_ids.len(),
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| OrchestratorError::SnapshotCaptureFailure(e.to_string()))?;

        let mut by_id: HashMap<String, Record> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut prior_records = Vec::with_capacity(target_ids.len());
        for id in target_ids {
            let record = by_id.remove(id).ok_or_else(|| {
                OrchestratorError::SnapshotCaptureFailure(format!("record {} not found", id))
            })?;
            prior_records.push(record);
        }

        let snapshot = Snapshot {
            operation_id,
            kind,
            target_ids: target_ids.to_vec(),
            prior_records,
            captured_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };

        match self.snapshots.entry(operation_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(OrchestratorError::SnapshotCaptureFailure(format!(
                    "operation {} already has a snapshot",
                    operation_id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
        }
        self.evict_over_capacity(operation_id);
        Ok(())
    }

    /// Replace one target's prior state with a read taken just before that
    /// target is written. Returns false if there is nothing to refresh.
    pub(crate) fn refresh(&self, operation_id: Uuid, record: Record) -> bool {
        if let Some(mut snapshot) = self.snapshots.get_mut(&operation_id)
            && let Some(slot) = snapshot.prior_records.iter_mut().find(|r| r.id == record.id)
        {
            *slot = record;
            return true;
        }
        false
    }

    pub fn get(&self, operation_id: Uuid) -> Option<Snapshot> {
        self.snapshots.get(&operation_id).map(|s| s.clone())
    }

    /// Take the snapshot out of the store.
    pub fn consume(&self, operation_id: Uuid) -> Option<Snapshot> {
        self.snapshots.remove(&operation_id).map(|(_, s)| s)
    }

    /// Put a consumed snapshot back after a restore that did not finish.
    pub(crate) fn reinstate(&self, snapshot: Snapshot) {
        self.snapshots.entry(snapshot.operation_id).or_insert(snapshot);
    }

    pub fn contains(&self, operation_id: Uuid) -> bool {
        self.snapshots.contains_key(&operation_id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    fn evict_over_capacity(&self, keep: Uuid) {
        let excess = self.snapshots.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let mut oldest: Vec<(u64, Uuid)> = self
            .snapshots
            .iter()
            .filter(|s| s.operation_id != keep)
            .map(|s| (s.seq, s.operation_id))
            .collect();
        oldest.sort_unstable();
        for (_, id) in oldest.into_iter().take(excess) {
            tracing::warn!("Dropping snapshot of operation {}; it can no longer be undone", id);
            self.snapshots.remove(&id);
        }
    }
}
