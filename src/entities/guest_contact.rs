use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Contact details captured for a guest purchase
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "guest_contacts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub purchase_record_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[sea_orm(nullable)]
    pub address: Option<String>,
    #[sea_orm(nullable)]
    pub postal_code: Option<String>,
    #[sea_orm(nullable)]
    pub city: Option<String>,
    #[sea_orm(nullable)]
    pub region: Option<String>,
    #[sea_orm(nullable)]
    pub country: Option<String>,
    #[sea_orm(nullable)]
    pub phone: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::purchase_record::Entity",
        from = "Column::PurchaseRecordId",
        to = "super::purchase_record::Column::Id"
    )]
    PurchaseRecord,
}

impl Related<super::purchase_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
