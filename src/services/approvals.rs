//! Approval engine: resolves amount-banded chains and advances documents
//! through them. Concurrent approvals on the same document are serialized by
//! level-and-status-guarded updates.

use crate::{
    db::DbPool,
    domain::approval::{self, AdvanceError, ChainError, ChainStep},
    entities::{
        approval_rule::{self, ApprovalDocumentType, Entity as ApprovalRuleEntity},
        purchase_order, purchase_order::Entity as PurchaseOrderEntity,
        purchase_requisition, purchase_requisition::Entity as PurchaseRequisitionEntity,
        sales_order, sales_order::Entity as SalesOrderEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Status vocabulary of an approvable document type.
struct StatusMap {
    /// Statuses a document may be submitted from
    submittable: &'static [&'static str],
    pending: &'static str,
    approved: &'static str,
    rejected: &'static str,
}

fn status_map(document_type: ApprovalDocumentType) -> StatusMap {
    match document_type {
        ApprovalDocumentType::PurchaseRequisition => StatusMap {
            submittable: &["draft"],
            pending: "submitted",
            approved: "approved",
            rejected: "rejected",
        },
        ApprovalDocumentType::PurchaseOrder => StatusMap {
            submittable: &["pending_approval"],
            pending: "pending_approval",
            approved: "approved",
            rejected: "rejected",
        },
        ApprovalDocumentType::SalesOrder => StatusMap {
            submittable: &["draft"],
            pending: "pending",
            approved: "confirmed",
            rejected: "cancelled",
        },
    }
}

/// Snapshot of the approval-relevant fields of a document.
#[derive(Debug, Clone)]
struct ApprovalTarget {
    status: String,
    current_level: i32,
    amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitOutcome {
    pub document_id: Uuid,
    pub status: String,
    pub chain: Vec<ChainStep>,
    pub auto_approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdvanceOutcome {
    pub document_id: Uuid,
    pub new_level: i32,
    pub is_final: bool,
    pub status: String,
}

#[derive(Clone)]
pub struct ApprovalService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl ApprovalService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Resolves the ordered approval chain for a document type and amount.
    /// Overlapping bands at one level are surfaced as
    /// `AmbiguousApprovalConfig`, never silently resolved.
    #[instrument(skip(self))]
    pub async fn resolve_chain(
        &self,
        document_type: ApprovalDocumentType,
        amount: Decimal,
    ) -> Result<Vec<ChainStep>, ServiceError> {
        let rules: Vec<approval_rule::Model> = ApprovalRuleEntity::find()
            .filter(approval_rule::Column::DocumentType.eq(document_type.as_str()))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        approval::resolve_chain(&rules, document_type.as_str(), amount).map_err(|e| match e {
            ChainError::Ambiguous { level, rule_ids } => {
                error!(
                    document_type = document_type.as_str(),
                    %amount,
                    level,
                    ?rule_ids,
                    "overlapping approval rule bands"
                );
                ServiceError::AmbiguousApprovalConfig(format!(
                    "{} rules {:?} overlap at level {} for amount {}",
                    document_type.as_str(),
                    rule_ids,
                    level,
                    amount
                ))
            }
        })
    }

    /// Submits a document into its approval chain. An empty chain means no
    /// approval is required and the document is approved immediately.
    #[instrument(skip(self))]
    pub async fn submit(
        &self,
        document_type: ApprovalDocumentType,
        document_id: Uuid,
    ) -> Result<SubmitOutcome, ServiceError> {
        let map = status_map(document_type);
        let target = self.load_target(document_type, document_id).await?;

        if !map.submittable.contains(&target.status.as_str()) {
            return Err(ServiceError::InvalidStatus(format!(
                "{} {} cannot be submitted from status '{}'",
                document_type.as_str(),
                document_id,
                target.status
            )));
        }

        let chain = self.resolve_chain(document_type, target.amount).await?;

        let new_status = if chain.is_empty() {
            map.approved
        } else {
            map.pending
        };

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::db_error)?;

        let rows = self
            .guarded_update(
                &txn,
                document_type,
                document_id,
                target.current_level,
                &target.status,
                target.current_level,
                new_status,
            )
            .await?;
        if rows == 0 {
            return Err(ServiceError::ConcurrentModification(document_id));
        }

        audit::log_transition(
            &txn,
            document_type.as_str(),
            document_id,
            &target.status,
            new_status,
            None,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        if chain.is_empty() {
            self.event_sender
                .send_or_log(Event::DocumentAutoApproved {
                    document_type: document_type.as_str().to_string(),
                    document_id,
                    amount: target.amount,
                })
                .await;
        }

        Ok(SubmitOutcome {
            document_id,
            status: new_status.to_string(),
            auto_approved: chain.is_empty(),
            chain,
        })
    }

    /// Advances a pending document one approval level. The approving role
    /// must own the next rung of the resolved chain.
    #[instrument(skip(self))]
    pub async fn advance(
        &self,
        document_type: ApprovalDocumentType,
        document_id: Uuid,
        approving_role: &str,
    ) -> Result<AdvanceOutcome, ServiceError> {
        let map = status_map(document_type);
        let target = self.load_target(document_type, document_id).await?;

        if target.status != map.pending {
            return Err(ServiceError::InvalidStatus(format!(
                "{} {} is not pending approval (status: {})",
                document_type.as_str(),
                document_id,
                target.status
            )));
        }

        let chain = self.resolve_chain(document_type, target.amount).await?;

        let advancement = approval::advance(&chain, target.current_level, approving_role)
            .map_err(|e| match e {
                AdvanceError::WrongApprover { expected, got } => {
                    ServiceError::WrongApprover { expected, got }
                }
                AdvanceError::AlreadyFinal => ServiceError::InvalidOperation(format!(
                    "{} {} has already completed its approval chain",
                    document_type.as_str(),
                    document_id
                )),
                AdvanceError::EmptyChain => ServiceError::InvalidOperation(format!(
                    "{} {} requires no approval",
                    document_type.as_str(),
                    document_id
                )),
            })?;

        let new_status = if advancement.is_final {
            map.approved
        } else {
            map.pending
        };

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::db_error)?;

        // The expected level and status in the WHERE clause serialize
        // concurrent approvers; a stale read affects zero rows.
        let rows = self
            .guarded_update(
                &txn,
                document_type,
                document_id,
                target.current_level,
                &target.status,
                advancement.new_level,
                new_status,
            )
            .await?;
        if rows == 0 {
            return Err(ServiceError::ConcurrentModification(document_id));
        }

        if advancement.is_final {
            audit::log_transition(
                &txn,
                document_type.as_str(),
                document_id,
                &target.status,
                new_status,
                None,
            )
            .await?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::ApprovalAdvanced {
                document_type: document_type.as_str().to_string(),
                document_id,
                level: advancement.new_level,
                role: approving_role.to_string(),
                is_final: advancement.is_final,
            })
            .await;

        Ok(AdvanceOutcome {
            document_id,
            new_level: advancement.new_level,
            is_final: advancement.is_final,
            status: new_status.to_string(),
        })
    }

    /// Rejects a pending document. Terminal for the whole chain.
    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        document_type: ApprovalDocumentType,
        document_id: Uuid,
        rejecting_role: &str,
        reason: Option<String>,
    ) -> Result<(), ServiceError> {
        let map = status_map(document_type);
        let target = self.load_target(document_type, document_id).await?;

        if target.status != map.pending {
            return Err(ServiceError::InvalidStatus(format!(
                "{} {} is not pending approval (status: {})",
                document_type.as_str(),
                document_id,
                target.status
            )));
        }

        let chain = self.resolve_chain(document_type, target.amount).await?;
        let pending_step = chain
            .iter()
            .find(|step| step.level > target.current_level)
            .ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "{} {} has no pending approval level",
                    document_type.as_str(),
                    document_id
                ))
            })?;

        if pending_step.role_name != rejecting_role {
            return Err(ServiceError::WrongApprover {
                expected: pending_step.role_name.clone(),
                got: rejecting_role.to_string(),
            });
        }

        let txn = self
            .db_pool
            .begin()
            .await
            .map_err(ServiceError::db_error)?;

        let rows = self
            .guarded_update(
                &txn,
                document_type,
                document_id,
                target.current_level,
                &target.status,
                target.current_level,
                map.rejected,
            )
            .await?;
        if rows == 0 {
            return Err(ServiceError::ConcurrentModification(document_id));
        }

        audit::log_transition(
            &txn,
            document_type.as_str(),
            document_id,
            &target.status,
            map.rejected,
            reason.clone(),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::ApprovalRejected {
                document_type: document_type.as_str().to_string(),
                document_id,
                level: pending_step.level,
                role: rejecting_role.to_string(),
                reason,
            })
            .await;

        Ok(())
    }

    async fn load_target(
        &self,
        document_type: ApprovalDocumentType,
        document_id: Uuid,
    ) -> Result<ApprovalTarget, ServiceError> {
        let db = self.db_pool.as_ref();
        let not_found = || {
            ServiceError::NotFound(format!(
                "{} {} not found",
                document_type.as_str(),
                document_id
            ))
        };

        match document_type {
            ApprovalDocumentType::PurchaseRequisition => {
                let model = PurchaseRequisitionEntity::find_by_id(document_id)
                    .one(db)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(not_found)?;
                Ok(ApprovalTarget {
                    status: model.status,
                    current_level: model.current_level,
                    amount: model.estimated_value,
                })
            }
            ApprovalDocumentType::PurchaseOrder => {
                let model = PurchaseOrderEntity::find_by_id(document_id)
                    .one(db)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(not_found)?;
                Ok(ApprovalTarget {
                    status: model.status,
                    current_level: model.current_level,
                    amount: model.total_amount,
                })
            }
            ApprovalDocumentType::SalesOrder => {
                let model = SalesOrderEntity::find_by_id(document_id)
                    .one(db)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(not_found)?;
                Ok(ApprovalTarget {
                    status: model.status,
                    current_level: model.current_level,
                    amount: model.total_amount,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn guarded_update<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        document_type: ApprovalDocumentType,
        document_id: Uuid,
        expected_level: i32,
        expected_status: &str,
        new_level: i32,
        new_status: &str,
    ) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let result = match document_type {
            ApprovalDocumentType::PurchaseRequisition => PurchaseRequisitionEntity::update_many()
                .col_expr(
                    purchase_requisition::Column::CurrentLevel,
                    Expr::value(new_level),
                )
                .col_expr(purchase_requisition::Column::Status, Expr::value(new_status))
                .col_expr(purchase_requisition::Column::UpdatedAt, Expr::value(now))
                .filter(purchase_requisition::Column::Id.eq(document_id))
                .filter(purchase_requisition::Column::CurrentLevel.eq(expected_level))
                .filter(purchase_requisition::Column::Status.eq(expected_status))
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?,
            ApprovalDocumentType::PurchaseOrder => PurchaseOrderEntity::update_many()
                .col_expr(purchase_order::Column::CurrentLevel, Expr::value(new_level))
                .col_expr(purchase_order::Column::Status, Expr::value(new_status))
                .col_expr(purchase_order::Column::UpdatedAt, Expr::value(now))
                .filter(purchase_order::Column::Id.eq(document_id))
                .filter(purchase_order::Column::CurrentLevel.eq(expected_level))
                .filter(purchase_order::Column::Status.eq(expected_status))
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?,
            ApprovalDocumentType::SalesOrder => SalesOrderEntity::update_many()
                .col_expr(sales_order::Column::CurrentLevel, Expr::value(new_level))
                .col_expr(sales_order::Column::Status, Expr::value(new_status))
                .col_expr(sales_order::Column::UpdatedAt, Expr::value(now))
                .filter(sales_order::Column::Id.eq(document_id))
                .filter(sales_order::Column::CurrentLevel.eq(expected_level))
                .filter(sales_order::Column::Status.eq(expected_status))
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?,
        };

        Ok(result.rows_affected)
    }
}
