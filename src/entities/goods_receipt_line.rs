use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "goods_receipt_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub goods_receipt_id: Uuid,
    pub item_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub received_quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::goods_receipt::Entity",
        from = "Column::GoodsReceiptId",
        to = "super::goods_receipt::Column::Id"
    )]
    GoodsReceipt,
}

impl Related<super::goods_receipt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GoodsReceipt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
