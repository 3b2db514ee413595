//! Goods receipt endpoints.

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
    errors::{ApiError, ErrorResponse},
    handlers::common::{created_response, success_response, validate_input},
    services::goods_receipts::{PostReceiptInput, ReceiptLineInput},
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReceiptLineRequest {
    pub item_id: Uuid,
    pub received_quantity: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PostReceiptRequest {
    pub purchase_order_id: Uuid,
    #[validate(length(min = 1, message = "a warehouse is required"))]
    pub warehouse: String,
    #[validate(length(min = 1, message = "at least one line is required"))]
    pub lines: Vec<ReceiptLineRequest>,
}

#[utoipa::path(
    post,
    path = "/api/v1/goods-receipts",
    request_body = PostReceiptRequest,
    responses(
        (status = 201, description = "Receipt posted; stock updated"),
        (status = 400, description = "Over-receipt or unknown item", body = ErrorResponse),
        (status = 422, description = "Purchase order missing or not approved", body = ErrorResponse)
    ),
    tag = "goods-receipts"
)]
pub async fn post_receipt(
    State(state): State<AppState>,
    Json(payload): Json<PostReceiptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let receipt = state
        .services
        .goods_receipts
        .post_receipt(PostReceiptInput {
            purchase_order_id: payload.purchase_order_id,
            warehouse: payload.warehouse,
            lines: payload
                .lines
                .into_iter()
                .map(|l| ReceiptLineInput {
                    item_id: l.item_id,
                    received_quantity: l.received_quantity,
                })
                .collect(),
        })
        .await?;
    Ok(created_response(ApiResponse::success(receipt)))
}

#[utoipa::path(
    get,
    path = "/api/v1/goods-receipts/{id}",
    responses(
        (status = 200, description = "Goods receipt"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "goods-receipts"
)]
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state
        .services
        .goods_receipts
        .get_receipt(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("goods receipt {} not found", id)))?;
    Ok(success_response(ApiResponse::success(receipt)))
}

pub fn goods_receipt_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(post_receipt))
        .route("/:id", get(get_receipt))
}
