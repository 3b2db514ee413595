//! CRUD and activation toggling for amount-banded approval rules.

use crate::{
    db::DbPool,
    entities::approval_rule::{self, ApprovalDocumentType, Entity as ApprovalRuleEntity},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreateRuleInput {
    pub document_type: String,
    pub approval_level: i32,
    pub role_name: String,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRuleInput {
    pub role_name: Option<String>,
    pub min_amount: Option<Option<Decimal>>,
    pub max_amount: Option<Option<Decimal>>,
    pub is_active: Option<bool>,
}

fn validate_rule(
    document_type: &str,
    approval_level: i32,
    min_amount: Option<Decimal>,
    max_amount: Option<Decimal>,
) -> Result<(), ServiceError> {
    if ApprovalDocumentType::from_str(document_type).is_none() {
        return Err(ServiceError::ValidationError(format!(
            "unknown document type '{}'",
            document_type
        )));
    }
    if approval_level < 1 {
        return Err(ServiceError::ValidationError(
            "approval_level must be a positive integer".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (min_amount, max_amount) {
        if min > max {
            return Err(ServiceError::ValidationError(format!(
                "min_amount {} exceeds max_amount {}",
                min, max
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ApprovalRuleService {
    db_pool: Arc<DbPool>,
}

impl ApprovalRuleService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, input))]
    pub async fn create_rule(
        &self,
        input: CreateRuleInput,
    ) -> Result<approval_rule::Model, ServiceError> {
        validate_rule(
            &input.document_type,
            input.approval_level,
            input.min_amount,
            input.max_amount,
        )?;

        let now = Utc::now();
        let model = approval_rule::ActiveModel {
            id: Set(Uuid::new_v4()),
            document_type: Set(input.document_type),
            approval_level: Set(input.approval_level),
            role_name: Set(input.role_name),
            min_amount: Set(input.min_amount),
            max_amount: Set(input.max_amount),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_rule(
        &self,
        rule_id: Uuid,
    ) -> Result<Option<approval_rule::Model>, ServiceError> {
        ApprovalRuleEntity::find_by_id(rule_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Lists rules, optionally restricted to one document type, ordered by
    /// level ascending.
    #[instrument(skip(self))]
    pub async fn list_rules(
        &self,
        document_type: Option<&str>,
    ) -> Result<Vec<approval_rule::Model>, ServiceError> {
        let mut query = ApprovalRuleEntity::find();
        if let Some(document_type) = document_type {
            query = query.filter(approval_rule::Column::DocumentType.eq(document_type));
        }

        query
            .order_by_asc(approval_rule::Column::DocumentType)
            .order_by_asc(approval_rule::Column::ApprovalLevel)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Applies updates, including activation toggling.
    #[instrument(skip(self, input))]
    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        input: UpdateRuleInput,
    ) -> Result<approval_rule::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let model = ApprovalRuleEntity::find_by_id(rule_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("approval rule {} not found", rule_id)))?;

        let min_amount = input.min_amount.unwrap_or(model.min_amount);
        let max_amount = input.max_amount.unwrap_or(model.max_amount);
        validate_rule(
            &model.document_type,
            model.approval_level,
            min_amount,
            max_amount,
        )?;

        let mut active = model.into_active_model();
        if let Some(role_name) = input.role_name {
            active.role_name = Set(role_name);
        }
        active.min_amount = Set(min_amount);
        active.max_amount = Set(max_amount);
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        active.update(db).await.map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn delete_rule(&self, rule_id: Uuid) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let model = ApprovalRuleEntity::find_by_id(rule_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("approval rule {} not found", rule_id)))?;

        model.delete(db).await.map_err(ServiceError::db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_inverted_band() {
        let err = validate_rule("purchase_order", 1, Some(dec!(100)), Some(dec!(50))).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn rejects_non_positive_level() {
        assert!(validate_rule("purchase_order", 0, None, None).is_err());
        assert!(validate_rule("purchase_order", -1, None, None).is_err());
        assert!(validate_rule("purchase_order", 1, None, None).is_ok());
    }

    #[test]
    fn rejects_unknown_document_type() {
        assert!(validate_rule("warranty_claim", 1, None, None).is_err());
    }
}
