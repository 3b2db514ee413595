//! Goods receipt posting. Receipts are only accepted against approved
//! purchase orders and cumulative received quantity per item never exceeds
//! the ordered quantity.

use crate::{
    db::DbPool,
    entities::{
        goods_receipt::{self, Entity as GoodsReceiptEntity},
        goods_receipt_line::{self, Entity as GoodsReceiptLineEntity},
        purchase_order::{Entity as PurchaseOrderEntity, PurchaseOrderStatus},
        purchase_order_line::{self, Entity as PurchaseOrderLineEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReceiptLineInput {
    pub item_id: Uuid,
    pub received_quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct PostReceiptInput {
    pub purchase_order_id: Uuid,
    pub warehouse: String,
    pub lines: Vec<ReceiptLineInput>,
}

#[derive(Clone)]
pub struct GoodsReceiptService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl GoodsReceiptService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Posts a receipt against an approved purchase order, updating stock in
    /// the receiving warehouse. Partial receipts accumulate across postings.
    #[instrument(skip(self, input), fields(purchase_order_id = %input.purchase_order_id))]
    pub async fn post_receipt(
        &self,
        input: PostReceiptInput,
    ) -> Result<goods_receipt::Model, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "a goods receipt requires at least one line".to_string(),
            ));
        }
        if let Some(line) = input
            .lines
            .iter()
            .find(|l| l.received_quantity <= Decimal::ZERO)
        {
            return Err(ServiceError::ValidationError(format!(
                "received quantity for item {} must be positive",
                line.item_id
            )));
        }

        let db = self.db_pool.as_ref();
        let po = PurchaseOrderEntity::find_by_id(input.purchase_order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::InvalidReference(format!(
                    "purchase order {} not found",
                    input.purchase_order_id
                ))
            })?;

        if PurchaseOrderStatus::from_str(&po.status) != Some(PurchaseOrderStatus::Approved) {
            return Err(ServiceError::InvalidReference(format!(
                "purchase order {} is not approved (status: {})",
                po.id, po.status
            )));
        }

        let po_lines = PurchaseOrderLineEntity::find()
            .filter(purchase_order_line::Column::PurchaseOrderId.eq(po.id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let ordered: HashMap<Uuid, Decimal> = po_lines
            .iter()
            .map(|line| (line.item_id, line.quantity))
            .collect();

        let already_received = self.cumulative_received(po.id).await?;

        for line in &input.lines {
            let ordered_qty = ordered.get(&line.item_id).copied().ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "item {} is not on purchase order {}",
                    line.item_id, po.id
                ))
            })?;
            let prior = already_received
                .get(&line.item_id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            if prior + line.received_quantity > ordered_qty {
                return Err(ServiceError::ValidationError(format!(
                    "receipt for item {} exceeds ordered quantity: ordered {}, already received {}, receiving {}",
                    line.item_id, ordered_qty, prior, line.received_quantity
                )));
            }
        }

        let now = Utc::now();
        let receipt_id = Uuid::new_v4();

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let receipt = goods_receipt::ActiveModel {
            id: Set(receipt_id),
            grn_number: Set(format!("GRN-{}", receipt_id.simple())),
            purchase_order_id: Set(po.id),
            warehouse: Set(input.warehouse.clone()),
            received_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        for line in &input.lines {
            goods_receipt_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                goods_receipt_id: Set(receipt_id),
                item_id: Set(line.item_id),
                received_quantity: Set(line.received_quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            stock::add_stock(&txn, line.item_id, &input.warehouse, line.received_quantity).await?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::GoodsReceiptPosted {
                goods_receipt_id: receipt_id,
                purchase_order_id: po.id,
            })
            .await;

        info!(goods_receipt_id = %receipt_id, purchase_order_id = %po.id, "goods receipt posted");
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn get_receipt(
        &self,
        receipt_id: Uuid,
    ) -> Result<Option<goods_receipt::Model>, ServiceError> {
        GoodsReceiptEntity::find_by_id(receipt_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Total received quantity per item across all receipts for a purchase
    /// order.
    pub async fn cumulative_received(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<HashMap<Uuid, Decimal>, ServiceError> {
        let db = self.db_pool.as_ref();
        let receipts = GoodsReceiptEntity::find()
            .filter(goods_receipt::Column::PurchaseOrderId.eq(purchase_order_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
        if receipts.is_empty() {
            return Ok(totals);
        }

        let receipt_ids: Vec<Uuid> = receipts.iter().map(|r| r.id).collect();
        let lines = GoodsReceiptLineEntity::find()
            .filter(goods_receipt_line::Column::GoodsReceiptId.is_in(receipt_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        for line in lines {
            *totals.entry(line.item_id).or_insert(Decimal::ZERO) += line.received_quantity;
        }
        Ok(totals)
    }
}
