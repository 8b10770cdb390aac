use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, FieldMap, Record};

/// A target record. Its schema-specific columns live in `fields`, a JSON
/// object the orchestrator treats as opaque.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub fields: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn field_map(&self) -> Result<FieldMap, DomainError> {
        Ok(serde_json::from_str(&self.fields)?)
    }
}

impl TryFrom<Model> for Record {
    type Error = DomainError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let fields = model.field_map()?;
        Ok(Record::new(model.id, fields))
    }
}
