//! Record store contract
//!
//! The orchestrator treats every record as an opaque identifier plus a
//! string-keyed field map. Implementations live in the infrastructure layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::DomainError;

/// Opaque string-keyed field mapping.
pub type FieldMap = Map<String, Value>;

/// One target record with its full field state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: FieldMap,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Storage area a mutation inserts into or deletes from.
///
/// `Records` holds the target records themselves. The other collections
/// hold rows created *about* a target (notifications, attendance stamps,
/// activity memberships) and carry a `record_id` field pointing back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Records,
    Notifications,
    Attendance,
    ActivityLinks,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Records => "records",
            Collection::Notifications => "notifications",
            Collection::Attendance => "attendance",
            Collection::ActivityLinks => "activity_links",
        }
    }
}

impl std::str::FromStr for Collection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "records" => Ok(Collection::Records),
            "notifications" => Ok(Collection::Notifications),
            "attendance" => Ok(Collection::Attendance),
            "activity_links" => Ok(Collection::ActivityLinks),
            other => Err(DomainError::Validation(format!(
                "unknown collection '{}'",
                other
            ))),
        }
    }
}

/// How `write_one` combines the given fields with the stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overlay the given keys, keep every other stored key.
    Merge,
    /// Stored fields become exactly the given map. Used for restores.
    Replace,
}

/// Per-record read/update/insert/delete against the record store.
///
/// Only the mutation executor and the undo controller write through this
/// trait.
#[async_trait]
pub trait EntityMutator: Send + Sync {
    /// Read the current state of the given records.
    ///
    /// Missing ids are simply absent from the result; callers decide whether
    /// that is an error.
    async fn read_many(&self, ids: &[String]) -> Result<Vec<Record>, DomainError>;

    /// Update an existing record. Fails with `NotFound` if it does not exist.
    async fn write_one(&self, id: &str, fields: FieldMap, mode: WriteMode)
    -> Result<(), DomainError>;

    /// Insert a row into `collection`.
    ///
    /// An `id` field is used as the row key when present, otherwise one is
    /// generated. Inserting an entry whose id already exists replaces it.
    async fn insert_one(&self, collection: Collection, fields: FieldMap)
    -> Result<(), DomainError>;

    /// Delete a row. Deleting a record that does not exist is an error;
    /// deleting an absent entry from the other collections is not.
    async fn delete_one(&self, collection: Collection, id: &str) -> Result<(), DomainError>;
}
