//! Defines routes for the QR image stage.
//!
//! ## Structure
//! - **Pipeline**
//!   - `POST   /events` - process one batch-publish event
//!
//! - **Batches**
//!   - `PUT    /batches/{process_id}` - register a pending batch
//!   - `GET    /batches/{process_id}` - read batch status and archive URL
//!
//! - **Objects**
//!   - `GET    /objects/{container}/{*key}` - download an uploaded archive
//!   - `HEAD   /objects/{container}/{*key}` - retrieve metadata only
//!
//! - **Ops**
//!   - `GET    /healthz`, `GET /readyz`, `GET /stats`

use crate::{
    handlers::{
        batch_handlers::{get_batch, register_batch},
        event_handlers::ingest_event,
        health_handlers::{healthz, readyz, stats},
        object_handlers::{get_object, head_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .route("/events", post(ingest_event))
        .route("/batches/{process_id}", get(get_batch).put(register_batch))
        .route("/objects/{container}/{*key}", get(get_object).head(head_object))
}
