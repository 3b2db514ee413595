use crate::{entities::status_log, errors::ServiceError};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use uuid::Uuid;

/// Appends one row to the status transition history. Called inside the same
/// transaction as the transition it records.
pub async fn log_transition<C: ConnectionTrait>(
    conn: &C,
    document_type: &str,
    document_id: Uuid,
    from_status: &str,
    to_status: &str,
    reason: Option<String>,
) -> Result<(), ServiceError> {
    let entry = status_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        document_type: Set(document_type.to_string()),
        document_id: Set(document_id),
        from_status: Set(from_status.to_string()),
        to_status: Set(to_status.to_string()),
        reason: Set(reason),
        occurred_at: Set(Utc::now()),
    };

    entry.insert(conn).await.map_err(ServiceError::db_error)?;
    Ok(())
}
