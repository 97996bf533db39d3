//! Shared state handed to every handler.

use crate::services::{
    pipeline::Pipeline, status_recorder::SqliteStatusStore, storage_service::StorageService,
};
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub batches: SqliteStatusStore,
    pub pipeline: Arc<Pipeline>,
    /// Deadline for one `POST /events` call.
    pub event_timeout: Duration,
}
