//! Generic approval actions across document types. The `:doc_type` segment
//! selects which table the engine operates on.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::approval_rule::ApprovalDocumentType,
    errors::{ApiError, ErrorResponse, ServiceError},
    handlers::common::{success_response, validate_input},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApproveRequest {
    #[validate(length(min = 1, message = "an approving role is required"))]
    pub role: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RejectRequest {
    #[validate(length(min = 1, message = "a rejecting role is required"))]
    pub role: String,
    pub reason: Option<String>,
}

fn parse_document_type(raw: &str) -> Result<ApprovalDocumentType, ApiError> {
    ApprovalDocumentType::from_str(raw).ok_or_else(|| {
        ApiError::ServiceError(ServiceError::ValidationError(format!(
            "unknown document type '{}'",
            raw
        )))
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/documents/{doc_type}/{id}/submit",
    responses(
        (status = 200, description = "Document submitted; empty chains auto-approve"),
        (status = 400, description = "Not submittable from its current status", body = ErrorResponse)
    ),
    tag = "approvals"
)]
pub async fn submit_document(
    State(state): State<AppState>,
    Path((doc_type, id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let document_type = parse_document_type(&doc_type)?;
    let outcome = state.services.approvals.submit(document_type, id).await?;
    Ok(success_response(ApiResponse::success(outcome)))
}

#[utoipa::path(
    post,
    path = "/api/v1/documents/{doc_type}/{id}/approve",
    request_body = ApproveRequest,
    responses(
        (status = 200, description = "Advanced one level; final approval flips the status"),
        (status = 409, description = "Wrong approver or concurrent modification", body = ErrorResponse)
    ),
    tag = "approvals"
)]
pub async fn approve_document(
    State(state): State<AppState>,
    Path((doc_type, id)): Path<(String, Uuid)>,
    Json(payload): Json<ApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let document_type = parse_document_type(&doc_type)?;
    let outcome = state
        .services
        .approvals
        .advance(document_type, id, &payload.role)
        .await?;
    Ok(success_response(ApiResponse::success(outcome)))
}

#[utoipa::path(
    post,
    path = "/api/v1/documents/{doc_type}/{id}/reject",
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Document rejected; terminal for the chain"),
        (status = 409, description = "Wrong approver", body = ErrorResponse)
    ),
    tag = "approvals"
)]
pub async fn reject_document(
    State(state): State<AppState>,
    Path((doc_type, id)): Path<(String, Uuid)>,
    Json(payload): Json<RejectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let document_type = parse_document_type(&doc_type)?;
    state
        .services
        .approvals
        .reject(document_type, id, &payload.role, payload.reason)
        .await?;
    Ok(success_response(ApiResponse::success(serde_json::json!({
        "document_id": id,
        "rejected": true
    }))))
}

pub fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/:doc_type/:id/submit", post(submit_document))
        .route("/:doc_type/:id/approve", post(approve_document))
        .route("/:doc_type/:id/reject", post(reject_document))
}
