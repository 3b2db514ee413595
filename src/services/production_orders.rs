//! Production order lifecycle. Every order references the active BOM for its
//! finished item; starting an order is the trigger for raw-material
//! replenishment.

use crate::{
    db::DbPool,
    entities::{
        bom::{self, Entity as BomEntity},
        production_order::{self, Entity as ProductionOrderEntity, ProductionOrderStatus},
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
pub struct CreateProductionOrderInput {
    pub finished_item_id: Uuid,
    pub quantity_planned: Decimal,
    pub source_type: Option<String>,
    pub source_id: Option<Uuid>,
}

/// Finds the active BOM for a finished item. Usable inside an open
/// transaction.
pub async fn active_bom<C: sea_orm::ConnectionTrait>(
    conn: &C,
    finished_item_id: Uuid,
) -> Result<Option<bom::Model>, ServiceError> {
    BomEntity::find()
        .filter(bom::Column::FinishedItemId.eq(finished_item_id))
        .filter(bom::Column::IsActive.eq(true))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

#[derive(Clone)]
pub struct ProductionOrderService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl ProductionOrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input), fields(finished_item_id = %input.finished_item_id))]
    pub async fn create_order(
        &self,
        input: CreateProductionOrderInput,
    ) -> Result<production_order::Model, ServiceError> {
        if input.quantity_planned <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "planned quantity must be positive".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let bom = active_bom(db, input.finished_item_id)
            .await?
            .ok_or(ServiceError::NoBomDefined(input.finished_item_id))?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        production_order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("MO-{}", order_id.simple())),
            bom_id: Set(bom.id),
            finished_item_id: Set(input.finished_item_id),
            quantity_planned: Set(input.quantity_planned),
            quantity_produced: Set(Decimal::ZERO),
            quantity_rejected: Set(Decimal::ZERO),
            status: Set(ProductionOrderStatus::Draft.as_str().to_string()),
            source_type: Set(input.source_type),
            source_id: Set(input.source_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError> {
        ProductionOrderEntity::find_by_id(order_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Moves a draft order to in_progress. Guarded on the draft status so a
    /// concurrent start loses cleanly.
    #[instrument(skip(self))]
    pub async fn start(&self, order_id: Uuid) -> Result<production_order::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = ProductionOrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("production order {} not found", order_id))
            })?;

        if ProductionOrderStatus::from_str(&order.status) != Some(ProductionOrderStatus::Draft) {
            return Err(ServiceError::InvalidStatus(format!(
                "production order {} cannot start from status {}",
                order_id, order.status
            )));
        }

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let result = ProductionOrderEntity::update_many()
            .col_expr(
                production_order::Column::Status,
                Expr::value(ProductionOrderStatus::InProgress.as_str()),
            )
            .col_expr(production_order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(production_order::Column::Id.eq(order_id))
            .filter(
                production_order::Column::Status.eq(ProductionOrderStatus::Draft.as_str()),
            )
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        audit::log_transition(
            &txn,
            "production_order",
            order_id,
            ProductionOrderStatus::Draft.as_str(),
            ProductionOrderStatus::InProgress.as_str(),
            None,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::ProductionOrderStarted(order_id))
            .await;

        info!(production_order_id = %order_id, "production order started");

        ProductionOrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("production order {} not found", order_id))
            })
    }
}
