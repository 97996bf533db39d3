//! Represents an uploaded object (archive) stored in a container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata of a stored object. The payload itself lives on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Logical container the object was uploaded to.
    pub container: String,

    /// Object key (path-like identifier within the container).
    pub key: String,

    /// Last path segment of the key.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}
