//! SeaORM implementation of AuditSink

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set};
use uuid::Uuid;

use crate::domain::DomainError;
use crate::models::audit_log::{self, Entity as AuditEntity};
use crate::orchestrator::{AuditLogEntry, AuditSink, OperationKind};

/// Append-only audit table. Rows are inserted and read, never updated.
pub struct SeaOrmAuditSink {
    db: DatabaseConnection,
}

impl SeaOrmAuditSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_entry(model: audit_log::Model) -> Result<AuditLogEntry, DomainError> {
    let operation_id = model
        .operation_id
        .parse::<Uuid>()
        .map_err(|e| DomainError::Internal(format!("bad operation id in audit log: {}", e)))?;
    let kind = model
        .kind
        .parse::<OperationKind>()
        .map_err(|e| DomainError::Internal(format!("bad kind in audit log: {}", e)))?;
    let timestamp = DateTime::parse_from_rfc3339(&model.created_at)
        .map_err(|e| DomainError::Internal(format!("bad timestamp in audit log: {}", e)))?
        .with_timezone(&Utc);

    Ok(AuditLogEntry {
        operation_id,
        kind,
        item_count: model.item_count.max(0) as usize,
        performed_by: model.performed_by,
        detail: serde_json::from_str(&model.detail)?,
        timestamp,
    })
}

#[async_trait]
impl AuditSink for SeaOrmAuditSink {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), DomainError> {
        let row = audit_log::ActiveModel {
            operation_id: Set(entry.operation_id.to_string()),
            kind: Set(entry.kind.as_str().to_string()),
            item_count: Set(entry.item_count as i64),
            performed_by: Set(entry.performed_by),
            detail: Set(entry.detail.to_string()),
            created_at: Set(entry.timestamp.to_rfc3339()),
            ..Default::default()
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    async fn recent(&self, limit: u64) -> Result<Vec<AuditLogEntry>, DomainError> {
        AuditEntity::find()
            .order_by_desc(audit_log::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_entry)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;

    #[tokio::test]
    async fn appended_entries_read_back_newest_first() {
        let db = init_db("sqlite::memory:").await.expect("Failed to init db");
        let sink = SeaOrmAuditSink::new(db);

        let first = AuditLogEntry::new(
            Uuid::new_v4(),
            OperationKind::Transfer,
            3,
            "admin",
            json!({ "classId": "C9" }),
        );
        let second = AuditLogEntry::new(
            Uuid::new_v4(),
            OperationKind::StatusUpdate,
            1,
            "admin",
            json!({ "status": "suspended" }),
        );
        sink.append(first.clone()).await.unwrap();
        sink.append(second.clone()).await.unwrap();

        let recent = sink.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].operation_id, second.operation_id);
        assert_eq!(recent[1].kind, OperationKind::Transfer);
        assert_eq!(recent[1].item_count, 3);
        assert_eq!(recent[1].detail, json!({ "classId": "C9" }));

        assert_eq!(sink.recent(1).await.unwrap().len(), 1);
    }
}
