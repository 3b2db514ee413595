//! Matching engine: validates an uploaded invoice against its quotation,
//! purchase order, and goods receipts, and decides hold / awaiting_grn /
//! approved at creation time. Matching results are frozen; the admin
//! override is the only route out of hold.

use crate::{
    config::MatchingConfig,
    db::DbPool,
    domain::matching::{
        self, DraftLine, InvoiceDisposition, MatchConfig, MatchStatus, MatchingResults,
        PoLineSnapshot,
    },
    entities::{
        goods_receipt, goods_receipt::Entity as GoodsReceiptEntity,
        goods_receipt_line, goods_receipt_line::Entity as GoodsReceiptLineEntity,
        invoice, invoice::Entity as InvoiceEntity, invoice::InvoiceStatus,
        invoice_line,
        purchase_order::Entity as PurchaseOrderEntity,
        purchase_order::PurchaseOrderStatus,
        purchase_order_line, purchase_order_line::Entity as PurchaseOrderLineEntity,
        quotation::Entity as QuotationEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::RequesterContext;

const DOCUMENT_TYPE: &str = "invoice";

#[derive(Debug, Clone)]
pub struct InvoiceLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceInput {
    pub invoice_number: Option<String>,
    pub purchase_order_id: Uuid,
    pub supplier_id: Uuid,
    pub total_amount: Decimal,
    pub lines: Vec<InvoiceLineInput>,
}

/// View of a decided invoice returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MatchedInvoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub purchase_order_id: Uuid,
    pub status: String,
    pub total_amount: Decimal,
    pub hold_reason: Option<String>,
    pub matching_results: MatchingResults,
}

impl MatchedInvoice {
    fn from_model(model: invoice::Model) -> Result<Self, ServiceError> {
        let matching_results = MatchingResults {
            quotation_match: MatchStatus::from_str(&model.quotation_match).ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "invalid quotation_match '{}' on invoice {}",
                    model.quotation_match, model.id
                ))
            })?,
            po_match: MatchStatus::from_str(&model.po_match).ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "invalid po_match '{}' on invoice {}",
                    model.po_match, model.id
                ))
            })?,
            grn_match: MatchStatus::from_str(&model.grn_match).ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "invalid grn_match '{}' on invoice {}",
                    model.grn_match, model.id
                ))
            })?,
        };

        Ok(Self {
            id: model.id,
            invoice_number: model.invoice_number,
            purchase_order_id: model.purchase_order_id,
            status: model.status,
            total_amount: model.total_amount,
            hold_reason: model.hold_reason,
            matching_results,
        })
    }
}

#[derive(Clone)]
pub struct InvoiceMatchingService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    matching: MatchingConfig,
}

impl InvoiceMatchingService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, matching: MatchingConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            matching,
        }
    }

    fn match_config(&self) -> MatchConfig {
        MatchConfig {
            quotation_tolerance_pct: self.matching.quotation_tolerance_pct,
            rate_tolerance_pct: self.matching.rate_tolerance_pct,
        }
    }

    /// Runs the 4-way match and persists the decided invoice. The referenced
    /// PO must exist and be approved, otherwise `InvalidReference`.
    #[instrument(skip(self, input), fields(purchase_order_id = %input.purchase_order_id))]
    pub async fn match_and_create_invoice(
        &self,
        input: CreateInvoiceInput,
    ) -> Result<MatchedInvoice, ServiceError> {
        let db = self.db_pool.as_ref();

        let po = PurchaseOrderEntity::find_by_id(input.purchase_order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::InvalidReference(format!(
                    "purchase order {} does not exist",
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

        // Best quotation total, when the PO traces back to one
        let quotation_total = match po.quotation_id {
            Some(quotation_id) => QuotationEntity::find_by_id(quotation_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .filter(|q| q.is_best)
                .map(|q| q.total_amount),
            None => None,
        };

        let received_by_item = self.cumulative_receipts(po.id).await?;

        let draft_lines: Vec<DraftLine> = input
            .lines
            .iter()
            .map(|l| DraftLine {
                item_id: l.item_id,
                quantity: l.quantity,
                rate: l.rate,
            })
            .collect();
        let po_snapshots: Vec<PoLineSnapshot> = po_lines
            .iter()
            .map(|l| PoLineSnapshot {
                item_id: l.item_id,
                quantity: l.quantity,
                rate: l.rate,
            })
            .collect();

        let outcome = matching::evaluate(
            input.total_amount,
            &draft_lines,
            &po_snapshots,
            quotation_total,
            received_by_item.as_ref(),
            &self.match_config(),
        );

        let status = match outcome.disposition {
            InvoiceDisposition::Approved => InvoiceStatus::Approved,
            InvoiceDisposition::AwaitingGrn => InvoiceStatus::AwaitingGrn,
            InvoiceDisposition::Hold => InvoiceStatus::Hold,
        };

        let now = Utc::now();
        let invoice_id = Uuid::new_v4();
        let invoice_number = input
            .invoice_number
            .unwrap_or_else(|| format!("INV-{}", invoice_id.simple()));

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let model = invoice::ActiveModel {
            id: Set(invoice_id),
            invoice_number: Set(invoice_number),
            purchase_order_id: Set(po.id),
            supplier_id: Set(input.supplier_id),
            status: Set(status.as_str().to_string()),
            total_amount: Set(input.total_amount),
            hold_reason: Set(outcome.hold_reason.clone()),
            quotation_match: Set(outcome.results.quotation_match.as_str().to_string()),
            po_match: Set(outcome.results.po_match.as_str().to_string()),
            grn_match: Set(outcome.results.grn_match.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = model.insert(&txn).await.map_err(ServiceError::db_error)?;

        for line in &input.lines {
            let line_model = invoice_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                invoice_id: Set(invoice_id),
                item_id: Set(line.item_id),
                quantity: Set(line.quantity),
                rate: Set(line.rate),
                amount: Set(line.quantity * line.rate),
                created_at: Set(now),
                updated_at: Set(now),
            };
            line_model
                .insert(&txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        audit::log_transition(
            &txn,
            DOCUMENT_TYPE,
            invoice_id,
            "draft",
            status.as_str(),
            outcome.hold_reason.clone(),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        match outcome.disposition {
            InvoiceDisposition::Approved => {
                self.event_sender
                    .send_or_log(Event::InvoiceMatched {
                        invoice_id,
                        purchase_order_id: po.id,
                    })
                    .await;
            }
            InvoiceDisposition::AwaitingGrn => {
                self.event_sender
                    .send_or_log(Event::InvoiceAwaitingGrn {
                        invoice_id,
                        purchase_order_id: po.id,
                    })
                    .await;
            }
            InvoiceDisposition::Hold => {
                self.event_sender
                    .send_or_log(Event::InvoiceHeld {
                        invoice_id,
                        purchase_order_id: po.id,
                        hold_reason: outcome.hold_reason.clone().unwrap_or_default(),
                    })
                    .await;
            }
        }

        info!(invoice_id = %invoice_id, status = status.as_str(), "invoice matched");
        MatchedInvoice::from_model(created)
    }

    /// Clears a held invoice. Requires the administrative capability and a
    /// non-empty reason; the reason is written to the transition history.
    #[instrument(skip(self, ctx))]
    pub async fn admin_approve(
        &self,
        invoice_id: Uuid,
        reason: &str,
        ctx: &RequesterContext,
    ) -> Result<MatchedInvoice, ServiceError> {
        ctx.require_admin()?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "an override reason is required".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let existing = InvoiceEntity::find_by_id(invoice_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("invoice {} not found", invoice_id)))?;

        if InvoiceStatus::from_str(&existing.status) != Some(InvoiceStatus::Hold) {
            return Err(ServiceError::InvalidOperation(format!(
                "invoice {} is not on hold (status: {})",
                invoice_id, existing.status
            )));
        }

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        // Status-guarded update serializes concurrent overrides
        let result = InvoiceEntity::update_many()
            .col_expr(
                invoice::Column::Status,
                Expr::value(InvoiceStatus::Approved.as_str()),
            )
            .col_expr(invoice::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(invoice::Column::Id.eq(invoice_id))
            .filter(invoice::Column::Status.eq(InvoiceStatus::Hold.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(invoice_id));
        }

        audit::log_transition(
            &txn,
            DOCUMENT_TYPE,
            invoice_id,
            InvoiceStatus::Hold.as_str(),
            InvoiceStatus::Approved.as_str(),
            Some(reason.to_string()),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::InvoiceAdminApproved {
                invoice_id,
                reason: reason.to_string(),
                approved_by_role: ctx.role.clone().unwrap_or_else(|| "unknown".to_string()),
            })
            .await;

        let updated = InvoiceEntity::find_by_id(invoice_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("invoice {} not found", invoice_id)))?;

        MatchedInvoice::from_model(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<MatchedInvoice>, ServiceError> {
        let model = InvoiceEntity::find_by_id(invoice_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        model.map(MatchedInvoice::from_model).transpose()
    }

    #[instrument(skip(self))]
    pub async fn list_invoices(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<MatchedInvoice>, u64), ServiceError> {
        let limit = limit.max(1);
        let page = page.max(1) - 1;

        let paginator = InvoiceEntity::find()
            .order_by_desc(invoice::Column::CreatedAt)
            .paginate(self.db_pool.as_ref(), limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let models = paginator
            .fetch_page(page)
            .await
            .map_err(ServiceError::db_error)?;

        let invoices = models
            .into_iter()
            .map(MatchedInvoice::from_model)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((invoices, total))
    }

    /// Sums received quantity per item across every GRN of the PO. `None`
    /// when the PO has no receipt rows at all.
    async fn cumulative_receipts(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Option<HashMap<Uuid, Decimal>>, ServiceError> {
        let db = self.db_pool.as_ref();

        let receipts = GoodsReceiptEntity::find()
            .filter(goods_receipt::Column::PurchaseOrderId.eq(purchase_order_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        if receipts.is_empty() {
            return Ok(None);
        }

        let receipt_ids: Vec<Uuid> = receipts.iter().map(|r| r.id).collect();
        let lines = GoodsReceiptLineEntity::find()
            .filter(goods_receipt_line::Column::GoodsReceiptId.is_in(receipt_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        if lines.is_empty() {
            return Ok(None);
        }

        let mut by_item: HashMap<Uuid, Decimal> = HashMap::new();
        for line in lines {
            *by_item.entry(line.item_id).or_insert(Decimal::ZERO) += line.received_quantity;
        }

        Ok(Some(by_item))
    }
}
