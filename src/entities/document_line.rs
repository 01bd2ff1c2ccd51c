use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub document_id: Uuid,
    pub position: i32,
    pub external_line_id: i64,
    pub item_ref: String,
    pub name: String,
    pub quantity: i64,
    /// Decimal strings keep the storefront's precision.
    pub rate: String,
    pub discount_percentage: String,
    pub net_minor: i64,
    pub kind: String,
    #[sea_orm(nullable)]
    pub parent_line_id: Option<i64>,
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
