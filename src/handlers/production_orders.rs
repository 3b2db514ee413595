//! Production order endpoints. Starting an order runs the raw-material
//! cascade and reports whether a requisition was raised.

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
    entities::production_order,
    errors::{ApiError, ErrorResponse},
    handlers::common::{created_response, success_response, validate_input},
    services::{cascade::RequisitionOutcome, production_orders::CreateProductionOrderInput},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductionOrderRequest {
    pub finished_item_id: Uuid,
    pub quantity_planned: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartProductionOrderResponse {
    #[schema(value_type = Object)]
    pub order: production_order::Model,
    pub replenishment: RequisitionOutcome,
}

#[utoipa::path(
    post,
    path = "/api/v1/production-orders",
    request_body = CreateProductionOrderRequest,
    responses(
        (status = 201, description = "Draft production order created"),
        (status = 422, description = "No active BOM for the item", body = ErrorResponse)
    ),
    tag = "production-orders"
)]
pub async fn create_production_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductionOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .production_orders
        .create_order(CreateProductionOrderInput {
            finished_item_id: payload.finished_item_id,
            quantity_planned: payload.quantity_planned,
            source_type: None,
            source_id: None,
        })
        .await?;
    Ok(created_response(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/production-orders/{id}",
    responses(
        (status = 200, description = "Production order"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "production-orders"
)]
pub async fn get_production_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .production_orders
        .get_order(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("production order {} not found", id)))?;
    Ok(success_response(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/production-orders/{id}/start",
    responses(
        (status = 200, description = "Started; replenishment outcome included",
            body = StartProductionOrderResponse),
        (status = 409, description = "Concurrent start", body = ErrorResponse)
    ),
    tag = "production-orders"
)]
pub async fn start_production_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.production_orders.start(id).await?;
    let replenishment = state
        .services
        .cascade
        .on_production_order_started(id)
        .await?;
    Ok(success_response(ApiResponse::success(
        StartProductionOrderResponse {
            order,
            replenishment,
        },
    )))
}

pub fn production_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_production_order))
        .route("/:id", get(get_production_order))
        .route("/:id/start", post(start_production_order))
}
