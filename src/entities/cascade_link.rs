use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Idempotency ledger for cascade outcomes. Before acting, the orchestrator
/// checks for an existing link keyed by source and the item scope the
/// cascade line covers; the target type records what the first run did,
/// including plain stock reservations that raise no document.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cascade_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source_type: String,
    pub source_id: Uuid,
    pub target_type: String,
    pub target_id: Uuid,
    /// Item scope of the triggered document; nil UUID for whole-document links
    pub target_item_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub mod source_type {
    pub const SALES_ORDER: &str = "sales_order";
    pub const PRODUCTION_ORDER: &str = "production_order";
    pub const QUOTATION: &str = "quotation";
}

pub mod target_type {
    pub const PRODUCTION_ORDER: &str = "production_order";
    pub const PURCHASE_REQUISITION: &str = "purchase_requisition";
    pub const PURCHASE_ORDER: &str = "purchase_order";
    /// Stock covered the demand; no document was raised but the
    /// reservation must not repeat.
    pub const STOCK_RESERVATION: &str = "stock_reservation";
}
