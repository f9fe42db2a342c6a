use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog identity of a stocked item. Descriptive fields are owned by product management;
/// the ledger only needs the id and a display name for alerts.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::location_stock::Entity")]
    LocationStock,
}

impl Related<super::location_stock::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LocationStock.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
