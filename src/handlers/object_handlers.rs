//! HTTP handlers serving uploaded archives back at the URLs the uploader
//! hands out. Bodies are streamed from disk.

use crate::{errors::AppError, models::object::Object, state::AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// Download an object `/objects/{container}/{*key}` as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path((container, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = state.storage.get_object_reader(&container, &key).await?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

/// HEAD `/objects/{container}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((container, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = state.storage.get_object_metadata(&container, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let quoted = format!("\"{}\"", meta.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    if let Some(name) = attachment_header(&meta.filename) {
        headers.insert(header::CONTENT_DISPOSITION, name);
    }

    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&meta.last_modified.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
}

fn attachment_header(filename: &str) -> Option<HeaderValue> {
    if filename.contains('"') {
        return None;
    }
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)).ok()
}
