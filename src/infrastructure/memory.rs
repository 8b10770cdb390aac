//! In-memory record store and audit sink.
//!
//! Used by the orchestrator's unit tests and by embedders that do not need
//! durable storage. Both support failure injection.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::domain::{Collection, DomainError, EntityMutator, FieldMap, Record, WriteMode};
use crate::orchestrator::{AuditLogEntry, AuditSink};

#[derive(Default)]
pub struct MemoryMutator {
    records: Mutex<BTreeMap<String, FieldMap>>,
    entries: Mutex<Vec<(Collection, String, FieldMap)>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<String>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
}

impl MemoryMutator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with `(id, fields)` pairs. Non-object field values seed an
    /// empty record.
    pub fn with_records<I, K>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mutator = Self::new();
        {
            let mut map = lock(&mutator.records);
            for (id, fields) in records {
                let fields = match fields {
                    Value::Object(map) => map,
                    _ => FieldMap::new(),
                };
                map.insert(id.into(), fields);
            }
        }
        mutator
    }

    pub fn record(&self, id: &str) -> Option<FieldMap> {
        lock(&self.records).get(id).cloned()
    }

    /// Rows inserted into `collection`, in insertion order.
    pub fn entries(&self, collection: Collection) -> Vec<FieldMap> {
        lock(&self.entries)
            .iter()
            .filter(|(c, _, _)| *c == collection)
            .map(|(_, _, fields)| fields.clone())
            .collect()
    }

    /// Make every write addressed to `id` fail.
    pub fn fail_on(&self, id: &str) {
        lock(&self.failing).insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
    }

    /// Delay every write by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Target ids of every write attempted so far, in order.
    pub fn attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }

    /// Highest number of writes ever in flight for a single record.
    pub fn max_concurrent_writes_per_record(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn begin_write(&self, target: &str) -> Result<(), DomainError> {
        lock(&self.attempts).push(target.to_string());
        {
            let mut in_flight = lock(&self.in_flight);
            let count = in_flight.entry(target.to_string()).or_insert(0);
            *count += 1;
            self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
        }

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(count) = lock(&self.in_flight).get_mut(target) {
            *count = count.saturating_sub(1);
        }

        if lock(&self.failing).contains(target) {
            return Err(DomainError::Database(format!(
                "injected failure for {}",
                target
            )));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn string_field(fields: &FieldMap, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl EntityMutator for MemoryMutator {
    async fn read_many(&self, ids: &[String]) -> Result<Vec<Record>, DomainError> {
        let records = lock(&self.records);
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id).map(|f| Record::new(id.clone(), f.clone())))
            .collect())
    }

    async fn write_one(
        &self,
        id: &str,
        fields: FieldMap,
        mode: WriteMode,
    ) -> Result<(), DomainError> {
        self.begin_write(id).await?;
        let mut records = lock(&self.records);
        let stored = records.get_mut(id).ok_or(DomainError::NotFound)?;
        match mode {
            WriteMode::Merge => stored.extend(fields),
            WriteMode::Replace => *stored = fields,
        }
        Ok(())
    }

    async fn insert_one(
        &self,
        collection: Collection,
        mut fields: FieldMap,
    ) -> Result<(), DomainError> {
        let target = match collection {
            Collection::Records => string_field(&fields, "id"),
            _ => string_field(&fields, "record_id"),
        }
        .ok_or_else(|| DomainError::Validation("insert is missing its record id".into()))?;
        self.begin_write(&target).await?;

        if collection == Collection::Records {
            fields.remove("id");
            let mut records = lock(&self.records);
            if records.contains_key(&target) {
                return Err(DomainError::Validation(format!("record {} exists", target)));
            }
            records.insert(target, fields);
            return Ok(());
        }

        let key = string_field(&fields, "id").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        fields.entry("id").or_insert_with(|| json!(key));
        let mut entries = lock(&self.entries);
        match entries.iter_mut().find(|(c, k, _)| *c == collection && *k == key) {
            Some(existing) => existing.2 = fields,
            None => entries.push((collection, key, fields)),
        }
        Ok(())
    }

    async fn delete_one(&self, collection: Collection, id: &str) -> Result<(), DomainError> {
        self.begin_write(id).await?;
        if collection == Collection::Records {
            return lock(&self.records)
                .remove(id)
                .map(|_| ())
                .ok_or(DomainError::NotFound);
        }
        lock(&self.entries).retain(|(c, k, _)| !(*c == collection && k == id));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditLogEntry>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in append order.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        lock(&self.entries).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), DomainError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::Database("audit store unavailable".into()));
        }
        lock(&self.entries).push(entry);
        Ok(())
    }

    async fn recent(&self, limit: u64) -> Result<Vec<AuditLogEntry>, DomainError> {
        Ok(lock(&self.entries)
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
