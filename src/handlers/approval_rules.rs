//! Approval rule administration and debug chain resolution.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::approval_rule::ApprovalDocumentType,
    errors::{ApiError, ErrorResponse, ServiceError},
    handlers::common::{created_response, no_content_response, success_response, validate_input},
    services::approval_rules::{CreateRuleInput, UpdateRuleInput},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRuleRequest {
    #[validate(length(min = 1))]
    pub document_type: String,
    pub approval_level: i32,
    #[validate(length(min = 1))]
    pub role_name: String,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateRuleRequest {
    pub role_name: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    /// Explicitly remove the lower bound (an absent min_amount leaves it as is)
    #[serde(default)]
    pub clear_min_amount: bool,
    /// Explicitly remove the upper bound
    #[serde(default)]
    pub clear_max_amount: bool,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveChainRequest {
    pub document_type: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ListRulesQuery {
    pub document_type: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/approval-rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule created"),
        (status = 400, description = "Invalid band or document type", body = ErrorResponse)
    ),
    tag = "approval-rules"
)]
pub async fn create_rule(
    State(state): State<AppState>,
    Json(payload): Json<CreateRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let rule = state
        .services
        .approval_rules
        .create_rule(CreateRuleInput {
            document_type: payload.document_type,
            approval_level: payload.approval_level,
            role_name: payload.role_name,
            min_amount: payload.min_amount,
            max_amount: payload.max_amount,
            is_active: payload.is_active,
        })
        .await?;
    Ok(created_response(ApiResponse::success(rule)))
}

#[utoipa::path(
    get,
    path = "/api/v1/approval-rules",
    responses((status = 200, description = "Rules ordered by level")),
    tag = "approval-rules"
)]
pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<ListRulesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rules = state
        .services
        .approval_rules
        .list_rules(query.document_type.as_deref())
        .await?;
    Ok(success_response(ApiResponse::success(rules)))
}

#[utoipa::path(
    get,
    path = "/api/v1/approval-rules/{id}",
    responses(
        (status = 200, description = "Rule"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "approval-rules"
)]
pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = state
        .services
        .approval_rules
        .get_rule(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("approval rule {} not found", id)))?;
    Ok(success_response(ApiResponse::success(rule)))
}

#[utoipa::path(
    put,
    path = "/api/v1/approval-rules/{id}",
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Rule updated"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "approval-rules"
)]
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let min_amount = if payload.clear_min_amount {
        Some(None)
    } else {
        payload.min_amount.map(Some)
    };
    let max_amount = if payload.clear_max_amount {
        Some(None)
    } else {
        payload.max_amount.map(Some)
    };

    let rule = state
        .services
        .approval_rules
        .update_rule(
            id,
            UpdateRuleInput {
                role_name: payload.role_name,
                min_amount,
                max_amount,
                is_active: payload.is_active,
            },
        )
        .await?;
    Ok(success_response(ApiResponse::success(rule)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/approval-rules/{id}",
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "approval-rules"
)]
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.approval_rules.delete_rule(id).await?;
    Ok(no_content_response())
}

/// Debug endpoint: shows the chain a document of the given type and amount
/// would traverse, without touching any document.
#[utoipa::path(
    post,
    path = "/api/v1/approval-rules/resolve",
    request_body = ResolveChainRequest,
    responses(
        (status = 200, description = "Resolved chain"),
        (status = 500, description = "Overlapping bands", body = ErrorResponse)
    ),
    tag = "approval-rules"
)]
pub async fn resolve_chain(
    State(state): State<AppState>,
    Json(payload): Json<ResolveChainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let document_type = ApprovalDocumentType::from_str(&payload.document_type).ok_or_else(|| {
        ApiError::ServiceError(ServiceError::ValidationError(format!(
            "unknown document type '{}'",
            payload.document_type
        )))
    })?;

    let chain = state
        .services
        .approvals
        .resolve_chain(document_type, payload.amount)
        .await?;
    Ok(success_response(ApiResponse::success(chain)))
}

pub fn approval_rule_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_rule).get(list_rules))
        .route("/resolve", post(resolve_chain))
        .route(
            "/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
}
