use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Idempotency ledger, keyed by storefront order id.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub external_order_id: i64,
    pub document_id: Uuid,
    pub last_status: String,
    #[sea_orm(nullable)]
    pub last_external_update: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub outcome: String,
    pub origin: String,
    #[sea_orm(nullable, indexed)]
    pub source_page: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::financial_document::Entity",
        from = "Column::DocumentId",
        to = "super::financial_document::Column::Id"
    )]
    Document,
}

impl Related<super::financial_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
