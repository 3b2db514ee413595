//! Sales order endpoints. Confirmation runs the finished-goods cascade after
//! the status transition commits and reports each line's outcome.

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
    entities::sales_order,
    errors::{ApiError, ErrorResponse},
    handlers::common::{created_response, success_response, validate_input},
    services::{
        cascade::LineCascadeOutcome,
        sales_orders::{CreateSalesOrderInput, SalesOrderLineInput},
    },
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct SalesOrderLineRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateSalesOrderRequest {
    pub party_id: Uuid,
    #[validate(length(min = 1, message = "at least one line is required"))]
    pub lines: Vec<SalesOrderLineRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmSalesOrderResponse {
    #[schema(value_type = Object)]
    pub order: sales_order::Model,
    pub cascade: Vec<LineCascadeOutcome>,
}

#[utoipa::path(
    post,
    path = "/api/v1/sales-orders",
    request_body = CreateSalesOrderRequest,
    responses(
        (status = 201, description = "Draft sales order created"),
        (status = 400, description = "Invalid lines", body = ErrorResponse)
    ),
    tag = "sales-orders"
)]
pub async fn create_sales_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateSalesOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .sales_orders
        .create_order(CreateSalesOrderInput {
            party_id: payload.party_id,
            lines: payload
                .lines
                .into_iter()
                .map(|l| SalesOrderLineInput {
                    item_id: l.item_id,
                    quantity: l.quantity,
                    rate: l.rate,
                })
                .collect(),
        })
        .await?;
    Ok(created_response(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales-orders/{id}",
    responses(
        (status = 200, description = "Sales order"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "sales-orders"
)]
pub async fn get_sales_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .sales_orders
        .get_order(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sales order {} not found", id)))?;
    Ok(success_response(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sales-orders/{id}/confirm",
    responses(
        (status = 200, description = "Confirmed; per-line cascade outcomes included",
            body = ConfirmSalesOrderResponse),
        (status = 409, description = "Concurrent confirmation", body = ErrorResponse)
    ),
    tag = "sales-orders"
)]
pub async fn confirm_sales_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.sales_orders.confirm(id).await?;
    let cascade = state.services.cascade.on_sales_order_confirmed(id).await?;
    Ok(success_response(ApiResponse::success(
        ConfirmSalesOrderResponse { order, cascade },
    )))
}

pub fn sales_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_sales_order))
        .route("/:id", get(get_sales_order))
        .route("/:id/confirm", post(confirm_sales_order))
}
