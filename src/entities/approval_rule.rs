use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Amount-banded approval rule. Rules for the same document type must
/// partition into non-overlapping level bands; two active rules matching the
/// same amount at the same level are a configuration fault.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "approval_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub document_type: String,
    /// 1-based; levels are totally ordered ascending
    pub approval_level: i32,
    pub role_name: String,
    /// Null means 0
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub min_amount: Option<Decimal>,
    /// Null means unbounded
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub max_amount: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Document types that run through the approval engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDocumentType {
    PurchaseRequisition,
    PurchaseOrder,
    SalesOrder,
}

impl ApprovalDocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseRequisition => "purchase_requisition",
            Self::PurchaseOrder => "purchase_order",
            Self::SalesOrder => "sales_order",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "purchase_requisition" => Some(Self::PurchaseRequisition),
            "purchase_order" => Some(Self::PurchaseOrder),
            "sales_order" => Some(Self::SalesOrder),
            _ => None,
        }
    }
}
