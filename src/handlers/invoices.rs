//! Invoice endpoints: 4-way match on creation, list/get, and the
//! administrative hold override.

use axum::{
    extract::{Path, Query, State},
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
    auth::RequesterContext,
    errors::{ApiError, ErrorResponse},
    handlers::common::{created_response, success_response, validate_input, PaginationParams},
    services::invoice_matching::{CreateInvoiceInput, InvoiceLineInput, MatchedInvoice},
    ApiResponse, AppState, PaginatedResponse,
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct InvoiceLineRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateInvoiceRequest {
    pub invoice_number: Option<String>,
    pub purchase_order_id: Uuid,
    pub supplier_id: Uuid,
    pub total_amount: Decimal,
    #[validate(length(min = 1, message = "at least one line is required"))]
    pub lines: Vec<InvoiceLineRequest>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AdminApproveRequest {
    #[validate(length(min = 1, message = "a reason is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvoiceListResponse {
    pub invoices: Vec<MatchedInvoice>,
    pub total: u64,
}

#[utoipa::path(
    post,
    path = "/api/v1/invoices",
    request_body = CreateInvoiceRequest,
    responses(
        (status = 201, description = "Invoice matched and created", body = MatchedInvoice),
        (status = 422, description = "Purchase order missing or not approved", body = ErrorResponse)
    ),
    tag = "invoices"
)]
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let input = CreateInvoiceInput {
        invoice_number: payload.invoice_number,
        purchase_order_id: payload.purchase_order_id,
        supplier_id: payload.supplier_id,
        total_amount: payload.total_amount,
        lines: payload
            .lines
            .into_iter()
            .map(|l| InvoiceLineInput {
                item_id: l.item_id,
                quantity: l.quantity,
                rate: l.rate,
            })
            .collect(),
    };

    let invoice = state.services.invoices.match_and_create_invoice(input).await?;
    Ok(created_response(ApiResponse::success(invoice)))
}

#[utoipa::path(
    post,
    path = "/api/v1/invoices/{id}/admin-approve",
    request_body = AdminApproveRequest,
    responses(
        (status = 200, description = "Hold cleared", body = MatchedInvoice),
        (status = 403, description = "Missing administrative capability", body = ErrorResponse)
    ),
    tag = "invoices"
)]
pub async fn admin_approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ctx: RequesterContext,
    Json(payload): Json<AdminApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let invoice = state
        .services
        .invoices
        .admin_approve(id, &payload.reason, &ctx)
        .await?;
    Ok(success_response(ApiResponse::success(invoice)))
}

#[utoipa::path(
    get,
    path = "/api/v1/invoices/{id}",
    responses(
        (status = 200, description = "Invoice with matching results", body = MatchedInvoice),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "invoices"
)]
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let invoice = state
        .services
        .invoices
        .get_invoice(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("invoice {} not found", id)))?;
    Ok(success_response(ApiResponse::success(invoice)))
}

#[utoipa::path(
    get,
    path = "/api/v1/invoices",
    params(PaginationParams),
    responses(
        (status = 200, description = "Paginated invoices", body = InvoiceListResponse)
    ),
    tag = "invoices"
)]
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (invoices, total) = state
        .services
        .invoices
        .list_invoices(params.page, params.per_page)
        .await?;

    let per_page = params.per_page.max(1);
    Ok(success_response(ApiResponse::success(PaginatedResponse {
        items: invoices,
        total,
        page: params.page,
        limit: per_page,
        total_pages: total.div_ceil(per_page),
    })))
}

pub fn invoice_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/admin-approve", post(admin_approve))
}
