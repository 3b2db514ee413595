//! Stock-driven cascade orchestrator.
//!
//! Confirming a sales order nets each line against finished-goods stock and
//! raises production orders for the shortfall. Starting a production order
//! nets the BOM expansion against raw-material stock and raises one
//! consolidated purchase requisition for the deficit. Every outcome that
//! commits work, a triggered document or a plain stock reservation, is
//! recorded in the cascade_links ledger so re-triggering is idempotent, and
//! one failing line never aborts the others.

use crate::{
    config::CascadeConfig,
    db::DbPool,
    domain::replenishment,
    entities::{
        bom_component::{self, Entity as BomComponentEntity},
        cascade_link::{self, source_type, target_type, Entity as CascadeLinkEntity},
        production_order::{self, Entity as ProductionOrderEntity, ProductionOrderStatus},
        purchase_requisition::{self, Entity as PurchaseRequisitionEntity, RequisitionStatus},
        purchase_requisition_line,
        sales_order::{Entity as SalesOrderEntity, SalesOrderStatus},
        sales_order_line::{self, Entity as SalesOrderLineEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{approvals::ApprovalService, production_orders, stock},
};
use crate::entities::approval_rule::ApprovalDocumentType;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Per-line result of the finished-goods cascade.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LineCascadeOutcome {
    /// Stock covered the full ordered quantity; it was reserved.
    FulfilledFromStock {
        item_id: Uuid,
        reserved: Decimal,
    },
    /// A production order was raised for the shortfall.
    ProductionTriggered {
        item_id: Uuid,
        production_order_id: Uuid,
        quantity_planned: Decimal,
        reserved: Decimal,
    },
    /// A previous cascade already covered this line; `production_order_id`
    /// is absent when that run fulfilled the line from stock.
    AlreadyTriggered {
        item_id: Uuid,
        production_order_id: Option<Uuid>,
    },
    /// The item is short but has no active BOM; nothing was raised.
    NoBomDefined {
        item_id: Uuid,
        shortfall: Decimal,
    },
}

/// Result of the raw-material cascade for a started production order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequisitionOutcome {
    /// Raw-material stock covered every component; reservations were taken.
    MaterialsAvailable,
    /// One consolidated requisition was raised for the deficits.
    RequisitionCreated {
        requisition_id: Uuid,
        lines: Vec<replenishment::ShortfallLine>,
        estimated_value: Decimal,
        routed_to_approval: bool,
    },
    /// A previous cascade already raised the requisition.
    AlreadyTriggered { requisition_id: Uuid },
}

#[derive(Clone)]
pub struct CascadeService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    approvals: Arc<ApprovalService>,
    config: CascadeConfig,
}

impl CascadeService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        approvals: Arc<ApprovalService>,
        config: CascadeConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            approvals,
            config,
        }
    }

    /// Runs the finished-goods cascade for a confirmed sales order. Each line
    /// commits in its own transaction, so a failure on one line leaves the
    /// others' outcomes intact.
    #[instrument(skip(self))]
    pub async fn on_sales_order_confirmed(
        &self,
        sales_order_id: Uuid,
    ) -> Result<Vec<LineCascadeOutcome>, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = SalesOrderEntity::find_by_id(sales_order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("sales order {} not found", sales_order_id))
            })?;

        if SalesOrderStatus::from_str(&order.status) != Some(SalesOrderStatus::Confirmed) {
            return Err(ServiceError::InvalidStatus(format!(
                "sales order {} is not confirmed (status: {})",
                sales_order_id, order.status
            )));
        }

        let lines = SalesOrderLineEntity::find()
            .filter(sales_order_line::Column::SalesOrderId.eq(sales_order_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut outcomes = Vec::with_capacity(lines.len());
        for line in &lines {
            match self.cascade_line(sales_order_id, line).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(
                        sales_order_id = %sales_order_id,
                        item_id = %line.item_id,
                        error = %e,
                        "cascade line failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    async fn cascade_line(
        &self,
        sales_order_id: Uuid,
        line: &sales_order_line::Model,
    ) -> Result<LineCascadeOutcome, ServiceError> {
        let db = self.db_pool.as_ref();

        if let Some(link) = self
            .find_trigger(db, source_type::SALES_ORDER, sales_order_id, line.item_id)
            .await?
        {
            let production_order_id = (link.target_type == target_type::PRODUCTION_ORDER)
                .then_some(link.target_id);
            return Ok(LineCascadeOutcome::AlreadyTriggered {
                item_id: line.item_id,
                production_order_id,
            });
        }

        let warehouse = &self.config.finished_goods_warehouse;
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        // Availability is read inside the transaction and the guarded
        // reservation re-checks it at write time
        let available = stock::available(&txn, line.item_id, warehouse).await?;
        let shortfall = replenishment::finished_goods_shortfall(line.quantity, available);

        if shortfall.is_zero() {
            stock::reserve(&txn, line.item_id, warehouse, line.quantity).await?;
            self.insert_link(
                &txn,
                source_type::SALES_ORDER,
                sales_order_id,
                target_type::STOCK_RESERVATION,
                Uuid::nil(),
                line.item_id,
            )
            .await?;
            txn.commit().await.map_err(ServiceError::db_error)?;

            self.event_sender
                .send_or_log(Event::StockReserved {
                    item_id: line.item_id,
                    warehouse: warehouse.clone(),
                    quantity: line.quantity,
                    reference_type: source_type::SALES_ORDER.to_string(),
                    reference_id: sales_order_id,
                })
                .await;

            return Ok(LineCascadeOutcome::FulfilledFromStock {
                item_id: line.item_id,
                reserved: line.quantity,
            });
        }

        // Short line: no active BOM is an outcome, not an error, so the
        // remaining lines still cascade.
        let bom = match production_orders::active_bom(&txn, line.item_id).await? {
            Some(bom) => bom,
            None => {
                warn!(item_id = %line.item_id, "no active BOM for short item");
                return Ok(LineCascadeOutcome::NoBomDefined {
                    item_id: line.item_id,
                    shortfall,
                });
            }
        };

        let reservable = available.min(line.quantity).max(Decimal::ZERO);
        let now = Utc::now();
        let po_id = Uuid::new_v4();

        production_order::ActiveModel {
            id: Set(po_id),
            order_number: Set(format!("MO-{}", po_id.simple())),
            bom_id: Set(bom.id),
            finished_item_id: Set(line.item_id),
            quantity_planned: Set(shortfall),
            quantity_produced: Set(Decimal::ZERO),
            quantity_rejected: Set(Decimal::ZERO),
            status: Set(ProductionOrderStatus::Draft.as_str().to_string()),
            source_type: Set(Some(source_type::SALES_ORDER.to_string())),
            source_id: Set(Some(sales_order_id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        if reservable > Decimal::ZERO {
            stock::reserve(&txn, line.item_id, warehouse, reservable).await?;
        }

        SalesOrderLineEntity::update_many()
            .col_expr(sales_order_line::Column::NeedsProduction, Expr::value(true))
            .col_expr(sales_order_line::Column::UpdatedAt, Expr::value(now))
            .filter(sales_order_line::Column::Id.eq(line.id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        self.insert_link(
            &txn,
            source_type::SALES_ORDER,
            sales_order_id,
            target_type::PRODUCTION_ORDER,
            po_id,
            line.item_id,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::ProductionOrderTriggered {
                sales_order_id,
                production_order_id: po_id,
                item_id: line.item_id,
                quantity_planned: shortfall,
            })
            .await;

        info!(
            sales_order_id = %sales_order_id,
            production_order_id = %po_id,
            item_id = %line.item_id,
            %shortfall,
            "production order triggered"
        );

        Ok(LineCascadeOutcome::ProductionTriggered {
            item_id: line.item_id,
            production_order_id: po_id,
            quantity_planned: shortfall,
            reserved: reservable,
        })
    }

    /// Runs the raw-material cascade for a started production order. Raises
    /// at most one consolidated purchase requisition, routed through the
    /// approval engine when its estimated value reaches the configured
    /// threshold.
    #[instrument(skip(self))]
    pub async fn on_production_order_started(
        &self,
        production_order_id: Uuid,
    ) -> Result<RequisitionOutcome, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = ProductionOrderEntity::find_by_id(production_order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "production order {} not found",
                    production_order_id
                ))
            })?;

        if ProductionOrderStatus::from_str(&order.status)
            != Some(ProductionOrderStatus::InProgress)
        {
            return Err(ServiceError::InvalidStatus(format!(
                "production order {} is not in progress (status: {})",
                production_order_id, order.status
            )));
        }

        // Whole-document idempotency: nil item scope. A found requisition
        // link re-runs the routing decision in case the first run failed
        // between commit and submit.
        if let Some(link) = self
            .find_trigger(db, source_type::PRODUCTION_ORDER, production_order_id, Uuid::nil())
            .await?
        {
            return if link.target_type == target_type::PURCHASE_REQUISITION {
                self.ensure_requisition_routed(link.target_id).await?;
                Ok(RequisitionOutcome::AlreadyTriggered {
                    requisition_id: link.target_id,
                })
            } else {
                Ok(RequisitionOutcome::MaterialsAvailable)
            };
        }

        let components = BomComponentEntity::find()
            .filter(bom_component::Column::BomId.eq(order.bom_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        if components.is_empty() {
            return Err(ServiceError::NoBomDefined(order.finished_item_id));
        }

        let requirements = replenishment::expand_bom(&components, order.quantity_planned);
        let item_ids: Vec<Uuid> = requirements.iter().map(|r| r.item_id).collect();

        let now = Utc::now();
        let warehouse = &self.config.raw_material_warehouse;
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        // Availability is read inside the transaction and the guarded
        // reservation re-checks it at write time
        let available = stock::available_map(&txn, &item_ids, warehouse).await?;
        let shortfalls = replenishment::material_shortfalls(&requirements, &available);

        // Reserve whatever is on hand, capped at the requirement
        for req in &requirements {
            let on_hand = available
                .get(&req.item_id)
                .copied()
                .unwrap_or(Decimal::ZERO)
                .max(Decimal::ZERO);
            let reservable = on_hand.min(req.required);
            if reservable > Decimal::ZERO {
                stock::reserve(&txn, req.item_id, warehouse, reservable).await?;
            }
        }

        if shortfalls.is_empty() {
            self.insert_link(
                &txn,
                source_type::PRODUCTION_ORDER,
                production_order_id,
                target_type::STOCK_RESERVATION,
                Uuid::nil(),
                Uuid::nil(),
            )
            .await?;
            txn.commit().await.map_err(ServiceError::db_error)?;
            return Ok(RequisitionOutcome::MaterialsAvailable);
        }

        let unit_costs: std::collections::HashMap<Uuid, Decimal> = components
            .iter()
            .filter_map(|c| c.unit_cost.map(|cost| (c.item_id, cost)))
            .collect();
        let estimated_value: Decimal = shortfalls
            .iter()
            .map(|s| {
                s.shortfall
                    * unit_costs
                        .get(&s.item_id)
                        .copied()
                        .unwrap_or(Decimal::ZERO)
            })
            .sum();

        let requisition_id = Uuid::new_v4();
        purchase_requisition::ActiveModel {
            id: Set(requisition_id),
            pr_number: Set(format!("PR-{}", requisition_id.simple())),
            department: Set("production".to_string()),
            status: Set(RequisitionStatus::Draft.as_str().to_string()),
            current_level: Set(0),
            estimated_value: Set(estimated_value),
            source_type: Set(Some(source_type::PRODUCTION_ORDER.to_string())),
            source_id: Set(Some(production_order_id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        for shortfall in &shortfalls {
            purchase_requisition_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                requisition_id: Set(requisition_id),
                item_id: Set(shortfall.item_id),
                quantity: Set(shortfall.shortfall),
                uom: Set(shortfall.uom.clone()),
                required_date: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        }

        self.insert_link(
            &txn,
            source_type::PRODUCTION_ORDER,
            production_order_id,
            target_type::PURCHASE_REQUISITION,
            requisition_id,
            Uuid::nil(),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        let routed_to_approval = estimated_value >= self.config.pr_approval_threshold;
        if routed_to_approval {
            self.approvals
                .submit(ApprovalDocumentType::PurchaseRequisition, requisition_id)
                .await?;
        }

        self.event_sender
            .send_or_log(Event::RequisitionTriggered {
                production_order_id,
                requisition_id,
                line_count: shortfalls.len(),
                estimated_value,
                routed_to_approval,
            })
            .await;

        info!(
            production_order_id = %production_order_id,
            requisition_id = %requisition_id,
            line_count = shortfalls.len(),
            %estimated_value,
            routed_to_approval,
            "purchase requisition triggered"
        );

        Ok(RequisitionOutcome::RequisitionCreated {
            requisition_id,
            lines: shortfalls,
            estimated_value,
            routed_to_approval,
        })
    }

    /// Looks up whatever a previous cascade recorded for this source and
    /// item scope, regardless of what it triggered.
    async fn find_trigger<C: ConnectionTrait>(
        &self,
        conn: &C,
        source: &str,
        source_id: Uuid,
        target_item_id: Uuid,
    ) -> Result<Option<cascade_link::Model>, ServiceError> {
        CascadeLinkEntity::find()
            .filter(cascade_link::Column::SourceType.eq(source))
            .filter(cascade_link::Column::SourceId.eq(source_id))
            .filter(cascade_link::Column::TargetItemId.eq(target_item_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Submits a draft requisition that crossed the approval threshold but
    /// missed its routing, e.g. when the first run failed after commit.
    async fn ensure_requisition_routed(&self, requisition_id: Uuid) -> Result<(), ServiceError> {
        let pr = PurchaseRequisitionEntity::find_by_id(requisition_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "purchase requisition {} not found",
                    requisition_id
                ))
            })?;

        if RequisitionStatus::from_str(&pr.status) == Some(RequisitionStatus::Draft)
            && pr.estimated_value >= self.config.pr_approval_threshold
        {
            self.approvals
                .submit(ApprovalDocumentType::PurchaseRequisition, requisition_id)
                .await?;
        }

        Ok(())
    }

    async fn insert_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        source: &str,
        source_id: Uuid,
        target: &str,
        target_id: Uuid,
        target_item_id: Uuid,
    ) -> Result<(), ServiceError> {
        cascade_link::ActiveModel {
            id: Set(Uuid::new_v4()),
            source_type: Set(source.to_string()),
            source_id: Set(source_id),
            target_type: Set(target.to_string()),
            target_id: Set(target_id),
            target_item_id: Set(target_item_id),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;
        Ok(())
    }
}
