use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sales invoice materialized from a storefront order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "financial_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub external_order_id: i64,
    pub order_number: String,
    pub state: String,
    #[sea_orm(indexed)]
    pub customer_id: Uuid,
    #[sea_orm(nullable)]
    pub billing_address_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub shipping_address_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub territory: Option<String>,
    #[sea_orm(nullable)]
    pub warehouse: Option<String>,
    #[sea_orm(nullable)]
    pub price_list: Option<String>,
    #[sea_orm(nullable)]
    pub company: Option<String>,
    #[sea_orm(nullable)]
    pub pricing_profile: Option<String>,
    pub pricing_source: String,
    pub currency: String,
    #[sea_orm(column_type = "Json")]
    pub charges: Json,
    #[sea_orm(nullable)]
    pub payment_category: Option<String>,
    pub settlement_status: String,
    #[sea_orm(nullable)]
    pub fulfilment_state: Option<String>,
    #[sea_orm(nullable)]
    pub delivery_date: Option<NaiveDate>,
    #[sea_orm(nullable)]
    pub delivery_time_from: Option<NaiveTime>,
    #[sea_orm(nullable)]
    pub delivery_duration_minutes: Option<i32>,
    pub total_minor: i64,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::document_line::Entity")]
    Lines,
    #[sea_orm(has_many = "super::settlement_record::Entity")]
    Settlements,
}

impl Related<super::document_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<super::settlement_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Settlements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
