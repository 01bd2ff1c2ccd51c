use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// `ext:<id>`, `email:<addr>` or `phone:<digits>`; concurrent creators collide here.
    #[sea_orm(unique)]
    pub match_key: String,
    #[sea_orm(nullable, indexed)]
    pub external_id: Option<String>,
    pub display_name: String,
    #[sea_orm(nullable, indexed)]
    pub email: Option<String>,
    #[sea_orm(nullable, indexed)]
    pub phone: Option<String>,
    #[sea_orm(nullable)]
    pub territory: Option<String>,
    pub territory_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::customer_address::Entity")]
    Addresses,
}

impl Related<super::customer_address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Addresses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
