//! Quotation endpoints, including the best-quotation selection.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::quotation::QuotationStatus,
    errors::{ApiError, ErrorResponse},
    handlers::common::{created_response, success_response, validate_input},
    services::quotations::{BestQuotationOutcome, CreateQuotationInput, QuotationLineInput},
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct QuotationLineRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateQuotationRequest {
    pub requisition_id: Option<Uuid>,
    pub supplier_id: Uuid,
    #[validate(length(min = 1, message = "at least one line is required"))]
    pub lines: Vec<QuotationLineRequest>,
}

#[utoipa::path(
    post,
    path = "/api/v1/quotations",
    request_body = CreateQuotationRequest,
    responses(
        (status = 201, description = "Quotation created pending approval"),
        (status = 400, description = "Invalid lines", body = ErrorResponse)
    ),
    tag = "quotations"
)]
pub async fn create_quotation(
    State(state): State<AppState>,
    Json(payload): Json<CreateQuotationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let quotation = state
        .services
        .quotations
        .create_quotation(CreateQuotationInput {
            requisition_id: payload.requisition_id,
            supplier_id: payload.supplier_id,
            lines: payload
                .lines
                .into_iter()
                .map(|l| QuotationLineInput {
                    item_id: l.item_id,
                    quantity: l.quantity,
                    rate: l.rate,
                })
                .collect(),
        })
        .await?;
    Ok(created_response(ApiResponse::success(quotation)))
}

#[utoipa::path(
    get,
    path = "/api/v1/quotations/{id}",
    responses(
        (status = 200, description = "Quotation"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "quotations"
)]
pub async fn get_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation = state
        .services
        .quotations
        .get_quotation(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("quotation {} not found", id)))?;
    Ok(success_response(ApiResponse::success(quotation)))
}

#[utoipa::path(
    post,
    path = "/api/v1/quotations/{id}/approve",
    responses(
        (status = 200, description = "Quotation approved"),
        (status = 400, description = "Not pending approval", body = ErrorResponse)
    ),
    tag = "quotations"
)]
pub async fn approve_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let quotation = state
        .services
        .quotations
        .set_status(id, QuotationStatus::Approved)
        .await?;
    Ok(success_response(ApiResponse::success(quotation)))
}

#[utoipa::path(
    post,
    path = "/api/v1/quotations/{id}/mark-best",
    responses(
        (status = 200, description = "Marked best; draft purchase order raised",
            body = BestQuotationOutcome),
        (status = 400, description = "Quotation not approved", body = ErrorResponse)
    ),
    tag = "quotations"
)]
pub async fn mark_best_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.services.quotations.mark_best(id).await?;
    Ok(success_response(ApiResponse::success(outcome)))
}

pub fn quotation_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_quotation))
        .route("/:id", get(get_quotation))
        .route("/:id/approve", post(approve_quotation))
        .route("/:id/mark-best", post(mark_best_quotation))
}
