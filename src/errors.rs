use crate::services::{
    archiver::ArchiveError, downloader::DownloadError, renderer::RenderError,
    status_recorder::StatusError, storage_service::StorageError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// The pipeline stage an event failed in.
#[derive(Debug, Error)]
pub enum Stage {
    #[error("scratch space unavailable: {0}")]
    Scratch(#[source] io::Error),
    #[error("acquisition failed: {0}")]
    Acquisition(#[from] DownloadError),
    #[error("generation failed: {0}")]
    Generation(#[from] RenderError),
    #[error("archive failed: {0}")]
    Archive(#[from] ArchiveError),
    #[error("upload failed: {0}")]
    Upload(#[from] StorageError),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Scratch(_) => "scratch",
            Stage::Acquisition(_) => "acquisition",
            Stage::Generation(_) => "generation",
            Stage::Archive(_) => "archive",
            Stage::Upload(_) => "upload",
        }
    }
}

/// A failed event, with the routing metadata the consuming runtime needs to
/// decide on retry or dead-lettering.
#[derive(Debug, Error)]
#[error("event {object_id} (partition {partition}, offset {offset}) failed: {stage}")]
pub struct ProcessingError {
    pub partition: i32,
    pub offset: i64,
    pub object_id: String,
    pub process_id: Option<String>,
    #[source]
    pub stage: Stage,
}

impl IntoResponse for ProcessingError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "stage": self.stage.name(),
            "processId": self.process_id,
            "partition": self.partition,
            "offset": self.offset,
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { .. } => AppError::not_found(err.to_string()),
            StorageError::InvalidContainerName { .. } | StorageError::InvalidObjectKey => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<StatusError> for AppError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::Unavailable(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}
