//! Record Service - seeding and inspection of target records

use sea_orm::*;
use serde_json::Value;

use crate::domain::{Collection, DomainError, EntityMutator, FieldMap, Record, WriteMode};
use crate::infrastructure::SeaOrmRecordRepository;
use crate::models::entry::{self, Entity as Entry};
use crate::models::record::{self, Entity as RecordEntity};

/// List records ordered by id
pub async fn list_records(
    db: &DatabaseConnection,
    limit: Option<u64>,
) -> Result<Vec<Record>, DomainError> {
    RecordEntity::find()
        .order_by_asc(record::Column::Id)
        .limit(limit)
        .all(db)
        .await?
        .into_iter()
        .map(Record::try_from)
        .collect()
}

pub async fn get_record(db: &DatabaseConnection, id: &str) -> Result<Record, DomainError> {
    let model = RecordEntity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or(DomainError::NotFound)?;
    Record::try_from(model)
}

/// Create a new record. The id must be non-blank and unused.
pub async fn create_record(
    db: &DatabaseConnection,
    id: &str,
    mut fields: FieldMap,
) -> Result<Record, DomainError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(DomainError::Validation("record id must not be blank".into()));
    }
    if RecordEntity::find_by_id(id.to_string()).one(db).await?.is_some() {
        return Err(DomainError::Validation(format!("record {} already exists", id)));
    }

    fields.insert("id".into(), Value::String(id.to_string()));
    SeaOrmRecordRepository::new(db.clone())
        .insert_one(Collection::Records, fields)
        .await?;

    get_record(db, id).await
}

/// Merge `fields` into the record, or overwrite it entirely when `replace`
pub async fn update_record(
    db: &DatabaseConnection,
    id: &str,
    fields: FieldMap,
    replace: bool,
) -> Result<Record, DomainError> {
    let mode = if replace {
        WriteMode::Replace
    } else {
        WriteMode::Merge
    };
    SeaOrmRecordRepository::new(db.clone())
        .write_one(id, fields, mode)
        .await?;

    get_record(db, id).await
}

/// Rows inserted about a record (notifications, attendance, activity links),
/// oldest first
pub async fn list_entries(
    db: &DatabaseConnection,
    record_id: &str,
    collection: Option<Collection>,
) -> Result<Vec<Value>, DomainError> {
    let mut query = Entry::find().filter(entry::Column::RecordId.eq(record_id));
    if let Some(collection) = collection {
        query = query.filter(entry::Column::Collection.eq(collection.as_str()));
    }

    let rows = query
        .order_by_asc(entry::Column::CreatedAt)
        .order_by_asc(entry::Column::Id)
        .all(db)
        .await?;

    rows.into_iter()
        .map(|row| -> Result<Value, DomainError> {
            let mut payload: Value = serde_json::from_str(&row.payload)?;
            if let Value::Object(map) = &mut payload {
                map.insert("collection".into(), Value::String(row.collection));
            }
            Ok(payload)
        })
        .collect()
}
