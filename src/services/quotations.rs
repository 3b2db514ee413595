//! Quotation lifecycle, including the best-quotation selection that blocks
//! the quoted amount and synchronously raises a draft purchase order.

use crate::{
    db::DbPool,
    entities::{
        cascade_link::{self, source_type, target_type, Entity as CascadeLinkEntity},
        purchase_order, purchase_order_line,
        quotation::{self, Entity as QuotationEntity, QuotationStatus},
        quotation_line, quotation_line::Entity as QuotationLineEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct QuotationLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateQuotationInput {
    pub requisition_id: Option<Uuid>,
    pub supplier_id: Uuid,
    pub lines: Vec<QuotationLineInput>,
}

/// Result of marking a quotation best.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BestQuotationOutcome {
    pub quotation_id: Uuid,
    pub purchase_order_id: Uuid,
    pub po_created: bool,
}

#[derive(Clone)]
pub struct QuotationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl QuotationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_quotation(
        &self,
        input: CreateQuotationInput,
    ) -> Result<quotation::Model, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "a quotation requires at least one line".to_string(),
            ));
        }

        let now = Utc::now();
        let quotation_id = Uuid::new_v4();
        let total: Decimal = input.lines.iter().map(|l| l.quantity * l.rate).sum();

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let model = quotation::ActiveModel {
            id: Set(quotation_id),
            quotation_number: Set(format!("QTN-{}", quotation_id.simple())),
            requisition_id: Set(input.requisition_id),
            supplier_id: Set(input.supplier_id),
            status: Set(QuotationStatus::PendingApproval.as_str().to_string()),
            total_amount: Set(total),
            is_best: Set(false),
            amount_blocked: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = model.insert(&txn).await.map_err(ServiceError::db_error)?;

        for line in &input.lines {
            quotation_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                quotation_id: Set(quotation_id),
                item_id: Set(line.item_id),
                quantity: Set(line.quantity),
                rate: Set(line.rate),
                amount: Set(line.quantity * line.rate),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_quotation(
        &self,
        quotation_id: Uuid,
    ) -> Result<Option<quotation::Model>, ServiceError> {
        QuotationEntity::find_by_id(quotation_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Moves a quotation to its approved state. Single-step supplier-side
    /// decision, distinct from the multi-level engine for purchase documents.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        quotation_id: Uuid,
        new_status: QuotationStatus,
    ) -> Result<quotation::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let model = QuotationEntity::find_by_id(quotation_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("quotation {} not found", quotation_id))
            })?;

        if QuotationStatus::from_str(&model.status) != Some(QuotationStatus::PendingApproval) {
            return Err(ServiceError::InvalidStatus(format!(
                "quotation {} is already {}",
                quotation_id, model.status
            )));
        }

        let old_status = model.status.clone();
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let mut active: quotation::ActiveModel = model.into();
        active.status = Set(new_status.as_str().to_string());
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        audit::log_transition(
            &txn,
            "quotation",
            quotation_id,
            &old_status,
            new_status.as_str(),
            None,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(updated)
    }

    /// Flags an approved quotation as best for its requisition, blocking its
    /// amount and synchronously raising a draft purchase order. At most one
    /// quotation per requisition holds the flag; re-invocation returns the
    /// already-created PO instead of raising a second one.
    #[instrument(skip(self))]
    pub async fn mark_best(
        &self,
        quotation_id: Uuid,
    ) -> Result<BestQuotationOutcome, ServiceError> {
        let db = self.db_pool.as_ref();
        let model = QuotationEntity::find_by_id(quotation_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("quotation {} not found", quotation_id))
            })?;

        if QuotationStatus::from_str(&model.status) != Some(QuotationStatus::Approved) {
            return Err(ServiceError::InvalidStatus(format!(
                "quotation {} must be approved before selection (status: {})",
                quotation_id, model.status
            )));
        }

        // Idempotency: a link from this quotation means the PO already exists
        if let Some(link) = CascadeLinkEntity::find()
            .filter(cascade_link::Column::SourceType.eq(source_type::QUOTATION))
            .filter(cascade_link::Column::SourceId.eq(quotation_id))
            .filter(cascade_link::Column::TargetType.eq(target_type::PURCHASE_ORDER))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            return Ok(BestQuotationOutcome {
                quotation_id,
                purchase_order_id: link.target_id,
                po_created: false,
            });
        }

        let lines = QuotationLineEntity::find()
            .filter(quotation_line::Column::QuotationId.eq(quotation_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let now = Utc::now();
        let po_id = Uuid::new_v4();

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        // Only one best quotation per requisition at a time
        if let Some(requisition_id) = model.requisition_id {
            QuotationEntity::update_many()
                .col_expr(quotation::Column::IsBest, Expr::value(false))
                .filter(quotation::Column::RequisitionId.eq(requisition_id))
                .filter(quotation::Column::Id.ne(quotation_id))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        let mut active: quotation::ActiveModel = model.clone().into();
        active.is_best = Set(true);
        active.amount_blocked = Set(true);
        active.updated_at = Set(now);
        active.update(&txn).await.map_err(ServiceError::db_error)?;

        purchase_order::ActiveModel {
            id: Set(po_id),
            po_number: Set(format!("PO-{}", po_id.simple())),
            quotation_id: Set(Some(quotation_id)),
            supplier_id: Set(model.supplier_id),
            status: Set("pending_approval".to_string()),
            total_amount: Set(model.total_amount),
            current_level: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        for line in &lines {
            purchase_order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_order_id: Set(po_id),
                item_id: Set(line.item_id),
                quantity: Set(line.quantity),
                rate: Set(line.rate),
                amount: Set(line.amount),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        }

        cascade_link::ActiveModel {
            id: Set(Uuid::new_v4()),
            source_type: Set(source_type::QUOTATION.to_string()),
            source_id: Set(quotation_id),
            target_type: Set(target_type::PURCHASE_ORDER.to_string()),
            target_id: Set(po_id),
            target_item_id: Set(Uuid::nil()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        audit::log_transition(&txn, "purchase_order", po_id, "draft", "pending_approval", None)
            .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::QuotationMarkedBest {
                quotation_id,
                purchase_order_id: Some(po_id),
            })
            .await;

        info!(quotation_id = %quotation_id, purchase_order_id = %po_id, "best quotation selected");

        Ok(BestQuotationOutcome {
            quotation_id,
            purchase_order_id: po_id,
            po_created: true,
        })
    }
}
