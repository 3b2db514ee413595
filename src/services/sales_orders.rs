//! Sales order creation and confirmation. Confirmation is the trigger point
//! for the stock-driven cascade; the handler invokes the orchestrator after
//! the status transition commits.

use crate::{
    db::DbPool,
    entities::{
        sales_order::{self, Entity as SalesOrderEntity, SalesOrderStatus},
        sales_order_line::{self, Entity as SalesOrderLineEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SalesOrderLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateSalesOrderInput {
    pub party_id: Uuid,
    pub lines: Vec<SalesOrderLineInput>,
}

#[derive(Clone)]
pub struct SalesOrderService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl SalesOrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_order(
        &self,
        input: CreateSalesOrderInput,
    ) -> Result<sales_order::Model, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "a sales order requires at least one line".to_string(),
            ));
        }
        if let Some(line) = input.lines.iter().find(|l| l.quantity <= Decimal::ZERO) {
            return Err(ServiceError::ValidationError(format!(
                "quantity for item {} must be positive",
                line.item_id
            )));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let total: Decimal = input.lines.iter().map(|l| l.quantity * l.rate).sum();

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let order = sales_order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("SO-{}", order_id.simple())),
            party_id: Set(input.party_id),
            status: Set(SalesOrderStatus::Draft.as_str().to_string()),
            total_amount: Set(total),
            current_level: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        for line in &input.lines {
            sales_order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                sales_order_id: Set(order_id),
                item_id: Set(line.item_id),
                quantity: Set(line.quantity),
                rate: Set(line.rate),
                amount: Set(line.quantity * line.rate),
                needs_production: Set(false),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<sales_order::Model>, ServiceError> {
        SalesOrderEntity::find_by_id(order_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn get_lines(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<sales_order_line::Model>, ServiceError> {
        SalesOrderLineEntity::find()
            .filter(sales_order_line::Column::SalesOrderId.eq(order_id))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Confirms a sales order. The update is guarded on the current status so
    /// two concurrent confirmations cannot both succeed.
    #[instrument(skip(self))]
    pub async fn confirm(&self, order_id: Uuid) -> Result<sales_order::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = SalesOrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("sales order {} not found", order_id)))?;

        let from = SalesOrderStatus::from_str(&order.status).ok_or_else(|| {
            ServiceError::InvalidStatus(format!("unknown sales order status '{}'", order.status))
        })?;
        if from.rank() >= SalesOrderStatus::Confirmed.rank() {
            return Err(ServiceError::InvalidStatus(format!(
                "sales order {} cannot be confirmed from status {}",
                order_id, order.status
            )));
        }

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let result = SalesOrderEntity::update_many()
            .col_expr(
                sales_order::Column::Status,
                Expr::value(SalesOrderStatus::Confirmed.as_str()),
            )
            .col_expr(sales_order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(sales_order::Column::Id.eq(order_id))
            .filter(sales_order::Column::Status.eq(order.status.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        audit::log_transition(
            &txn,
            "sales_order",
            order_id,
            &order.status,
            SalesOrderStatus::Confirmed.as_str(),
            None,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::SalesOrderConfirmed(order_id))
            .await;

        info!(sales_order_id = %order_id, "sales order confirmed");

        SalesOrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("sales order {} not found", order_id)))
    }
}
