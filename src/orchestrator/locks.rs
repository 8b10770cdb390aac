//! Advisory per-record locks.
//!
//! Two operations that share a target id take turns on that record instead
//! of interleaving their writes. A lock is held around a single record's
//! mutation, never across a whole operation.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

#[derive(Default)]
pub struct RecordLocks {
    table: Arc<LockTable>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `record_id`.
    pub async fn acquire(&self, record_id: &str) -> RecordGuard {
        let mutex = self
            .table
            .entry(record_id.to_string())
            .or_default()
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        RecordGuard {
            record_id: record_id.to_string(),
            table: Arc::clone(&self.table),
            guard: Some(guard),
        }
    }

    /// Number of records with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Releases the record on drop and removes the table entry once nobody
/// else is waiting on it.
pub struct RecordGuard {
    record_id: String,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.table
            .remove_if(&self.record_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_record_is_exclusive() {
        let locks = Arc::new(RecordLocks::new());
        let first = locks.acquire("S1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("S1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_records_do_not_block() {
        let locks = RecordLocks::new();
        let _a = locks.acquire("S1").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("S2"))
            .await
            .expect("S2 should not wait on S1");
        assert_eq!(locks.len(), 2);
    }
}
