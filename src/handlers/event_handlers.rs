//! `POST /events`: hands one event to the pipeline under a deadline.

use crate::{errors::AppError, models::event::Event, services::pipeline::Outcome, state::AppState};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::time::timeout;
use tracing::warn;

/// Run the pipeline for one event.
///
/// - 200 with `outcome: "skipped"` or `outcome: "succeeded"`
/// - 500 with the processing error, stage, partition and offset
/// - 504 if the deadline expires; scratch files are already gone by then
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> Result<Response, AppError> {
    let outcome = match timeout(state.event_timeout, state.pipeline.process(&event)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                object_id = %event.object_id,
                partition = event.partition,
                offset = event.offset,
                "event processing timed out after {:?}",
                state.event_timeout
            );
            state.pipeline.record_timeout(&event).await;
            return Err(AppError::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!(
                    "event {} (partition {}, offset {}) timed out",
                    event.object_id, event.partition, event.offset
                ),
            ));
        }
    };

    let response = match outcome {
        Outcome::Skipped(reason) => Json(json!({
            "outcome": "skipped",
            "detail": reason,
        }))
        .into_response(),
        Outcome::Succeeded { url, images } => Json(json!({
            "outcome": "succeeded",
            "url": url,
            "images": images,
        }))
        .into_response(),
        Outcome::Failed(err) => err.into_response(),
    };
    Ok(response)
}
