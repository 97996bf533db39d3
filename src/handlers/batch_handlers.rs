//! Batch status endpoints.

use crate::{errors::AppError, models::status::DialcodeBatch, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// `PUT /batches/{process_id}`: register a pending batch so its outcome
/// can be recorded. Existing batches are returned unchanged.
pub async fn register_batch(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
) -> Result<(StatusCode, Json<DialcodeBatch>), AppError> {
    let process_id = process_id.trim();
    if process_id.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "process id is required"));
    }
    let batch = state.batches.register_batch(process_id).await?;
    Ok((StatusCode::OK, Json(batch)))
}

/// `GET /batches/{process_id}`
pub async fn get_batch(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
) -> Result<Json<DialcodeBatch>, AppError> {
    state
        .batches
        .fetch_batch(&process_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("batch `{}` not found", process_id)))
}
