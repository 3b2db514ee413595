use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supplier invoice. Status and the three matching results are written once
/// by the matching engine at creation time; the only later mutation is the
/// hold -> approved admin override, which must carry a reason.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub invoice_number: String,
    pub purchase_order_id: Uuid,
    pub supplier_id: Uuid,
    pub status: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub hold_reason: Option<String>,
    pub quotation_match: String,
    pub po_match: String,
    pub grn_match: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::invoice_line::Entity")]
    Lines,
    #[sea_orm(
        belongs_to = "super::purchase_order::Entity",
        from = "Column::PurchaseOrderId",
        to = "super::purchase_order::Column::Id"
    )]
    PurchaseOrder,
}

impl Related<super::invoice_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<super::purchase_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Approved,
    Hold,
    AwaitingGrn,
    PendingVerification,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Hold => "hold",
            Self::AwaitingGrn => "awaiting_grn",
            Self::PendingVerification => "pending_verification",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "approved" => Some(Self::Approved),
            "hold" => Some(Self::Hold),
            "awaiting_grn" => Some(Self::AwaitingGrn),
            "pending_verification" => Some(Self::PendingVerification),
            _ => None,
        }
    }
}
