//! SeaORM implementation of EntityMutator

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde_json::Value;

use crate::domain::{Collection, DomainError, EntityMutator, FieldMap, Record, WriteMode};
use crate::models::entry::{self, Entity as EntryEntity};
use crate::models::record::{self, Entity as RecordEntity};

/// SeaORM-based record store: target records in `records`, everything
/// inserted about them in `entries`.
pub struct SeaOrmRecordRepository {
    db: DatabaseConnection,
}

impl SeaOrmRecordRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn string_field(fields: &FieldMap, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl EntityMutator for SeaOrmRecordRepository {
    async fn read_many(&self, ids: &[String]) -> Result<Vec<Record>, DomainError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let models = RecordEntity::find()
            .filter(record::Column::Id.is_in(ids.iter().cloned()))
            .all(&self.db)
            .await?;

        models.into_iter().map(Record::try_from).collect()
    }

    async fn write_one(
        &self,
        id: &str,
        fields: FieldMap,
        mode: WriteMode,
    ) -> Result<(), DomainError> {
        let existing = RecordEntity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .ok_or(DomainError::NotFound)?;

        let merged = match mode {
            WriteMode::Merge => {
                let mut stored = existing.field_map()?;
                stored.extend(fields);
                stored
            }
            WriteMode::Replace => fields,
        };

        let mut active: record::ActiveModel = existing.into();
        active.fields = Set(Value::Object(merged).to_string());
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.db).await?;

        Ok(())
    }

    async fn insert_one(
        &self,
        collection: Collection,
        mut fields: FieldMap,
    ) -> Result<(), DomainError> {
        let now = chrono::Utc::now().to_rfc3339();

        if collection == Collection::Records {
            let id = string_field(&fields, "id")
                .ok_or_else(|| DomainError::Validation("record insert needs an id".into()))?;
            fields.remove("id");

            let new_record = record::ActiveModel {
                id: Set(id),
                fields: Set(Value::Object(fields).to_string()),
                created_at: Set(now.clone()),
                updated_at: Set(now),
            };
            new_record.insert(&self.db).await?;
            return Ok(());
        }

        let record_id = string_field(&fields, "record_id")
            .ok_or_else(|| DomainError::Validation("entry insert needs a record_id".into()))?;
        let id = string_field(&fields, "id").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        fields.insert("id".into(), Value::String(id.clone()));

        let new_entry = entry::ActiveModel {
            id: Set(id),
            collection: Set(collection.as_str().to_string()),
            record_id: Set(record_id),
            payload: Set(Value::Object(fields).to_string()),
            created_at: Set(now),
        };

        EntryEntity::insert(new_entry)
            .on_conflict(
                OnConflict::column(entry::Column::Id)
                    .update_columns([
                        entry::Column::Collection,
                        entry::Column::RecordId,
                        entry::Column::Payload,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn delete_one(&self, collection: Collection, id: &str) -> Result<(), DomainError> {
        if collection == Collection::Records {
            let result = RecordEntity::delete_by_id(id.to_string())
                .exec(&self.db)
                .await?;

            if result.rows_affected == 0 {
                return Err(DomainError::NotFound);
            }
            return Ok(());
        }

        EntryEntity::delete_many()
            .filter(entry::Column::Id.eq(id))
            .filter(entry::Column::Collection.eq(collection.as_str()))
            .exec(&self.db)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;

    async fn repo_with(records: &[(&str, Value)]) -> SeaOrmRecordRepository {
        let db = init_db("sqlite::memory:").await.expect("Failed to init db");
        let repo = SeaOrmRecordRepository::new(db);
        for (id, fields) in records {
            let mut map = fields.as_object().cloned().unwrap_or_default();
            map.insert("id".into(), json!(id));
            repo.insert_one(Collection::Records, map)
                .await
                .expect("Failed to seed record");
        }
        repo
    }

    #[tokio::test]
    async fn merge_keeps_untouched_fields() {
        let repo = repo_with(&[("S1", json!({ "name": "Amal", "status": "active" }))]).await;

        let mut update = FieldMap::new();
        update.insert("status".into(), json!("suspended"));
        repo.write_one("S1", update, WriteMode::Merge).await.unwrap();

        let records = repo.read_many(&["S1".to_string()]).await.unwrap();
        assert_eq!(records[0].field("status"), Some(&json!("suspended")));
        assert_eq!(records[0].field("name"), Some(&json!("Amal")));
    }

    #[tokio::test]
    async fn replace_drops_keys_not_given() {
        let repo = repo_with(&[("S1", json!({ "name": "Amal", "archived": true }))]).await;

        let mut prior = FieldMap::new();
        prior.insert("name".into(), json!("Amal"));
        repo.write_one("S1", prior.clone(), WriteMode::Replace)
            .await
            .unwrap();

        let records = repo.read_many(&["S1".to_string()]).await.unwrap();
        assert_eq!(records[0].fields, prior);
    }

    #[tokio::test]
    async fn write_to_missing_record_is_not_found() {
        let repo = repo_with(&[]).await;
        let err = repo
            .write_one("nobody", FieldMap::new(), WriteMode::Merge)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[tokio::test]
    async fn entry_insert_with_same_id_replaces_payload() {
        let repo = repo_with(&[("S1", json!({}))]).await;

        for status in ["late", "present"] {
            let mut stamp = FieldMap::new();
            stamp.insert("id".into(), json!("2026-10-18:S1"));
            stamp.insert("record_id".into(), json!("S1"));
            stamp.insert("status".into(), json!(status));
            repo.insert_one(Collection::Attendance, stamp).await.unwrap();
        }

        let rows = EntryEntity::find().all(&repo.db).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].payload.contains("present"));
    }

    #[tokio::test]
    async fn deleting_missing_entry_is_fine_but_missing_record_is_not() {
        let repo = repo_with(&[]).await;
        repo.delete_one(Collection::ActivityLinks, "chess:S1")
            .await
            .unwrap();
        assert_eq!(
            repo.delete_one(Collection::Records, "S1").await.unwrap_err(),
            DomainError::NotFound
        );
    }
}
