//! src/services/storage_service.rs
//!
//! StorageService: the archive uploader. Object metadata lives in SQLite and
//! payloads on local disk, sharded beneath
//! `base_path/{container}/{shard}/{shard}/{key}`. Every stored object is
//! resolvable at `{public_base_url}/objects/{container}/{key}`.

use crate::models::object::Object;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use reqwest::Url;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("object `{key}` not found in container `{container}`")]
    ObjectNotFound { container: String, key: String },
    #[error("object `{key}` already exists in container `{container}` with different content")]
    ObjectExists { container: String, key: String },
    #[error("public base url `{0}` cannot carry object paths")]
    InvalidPublicUrl(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Pushes a local file to remote storage and returns a resolvable URL.
///
/// Uploading the same content to the same path must yield the same URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        local_file: &Path,
        container: &str,
        remote_path: &str,
        overwrite: bool,
    ) -> StorageResult<String>;
}

/// StorageService provides the object operations the stage needs:
/// - Upload an object (writes bytes to disk and upserts metadata into SQLite)
/// - Get object (reads metadata from SQLite and payload from disk)
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix of every URL handed out, e.g. `http://localhost:3000`.
    pub public_base_url: String,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;

impl StorageService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/` or have a `.` or `..` segment.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.split('/').any(|seg| seg == "." || seg == "..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate container name format.
    ///
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens, underscores only
    /// - must start and end with a letter or digit
    fn ensure_container_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidContainerName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, hyphens, and underscores",
            ));
        }
        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }
        Ok(())
    }

    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    /// Two-level shard identifiers: first two bytes of MD5(container/key)
    /// as lowercase hex.
    fn object_shards(container: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", container, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/container/{shard}/{shard}/{key}. Parents may not exist yet.
    fn object_path(&self, container: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(container, key);
        let mut path = self.container_root(container);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Resolvable URL of `key` in `container`. Each key segment is
    /// percent-encoded.
    pub fn public_url(&self, container: &str, key: &str) -> StorageResult<String> {
        let invalid = || StorageError::InvalidPublicUrl(self.public_base_url.clone());
        let mut url = Url::parse(&self.public_base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push("objects")
            .push(container)
            .extend(key.split('/'));
        Ok(url.into())
    }

    /// Fetch object metadata, or `None` if it was never stored.
    async fn find_object(&self, container: &str, key: &str) -> StorageResult<Option<Object>> {
        let object = sqlx::query_as::<_, Object>(
            "SELECT id, container, key, filename, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE container = ? AND key = ?",
        )
        .bind(container)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(object)
    }

    /// Stream-upload an object to disk and update metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts the metadata row.
    ///
    /// Cleans up temp files on errors.
    pub async fn upload_object_stream<S>(
        &self,
        container: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_container_name_safe(container)?;
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(container, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let etag = format!("{:x}", digest.compute());

        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, container, key, filename, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(container, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, container, key, filename, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(container)
        .bind(key)
        .bind(&filename)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        Ok(object)
    }

    /// Fetch an object for reading.
    ///
    /// Returns ObjectNotFound if metadata or the physical file is missing.
    pub async fn get_object_reader(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<(Object, File)> {
        let object = self.get_object_metadata(container, key).await?;

        let file_path = self.object_path(container, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Fetch only object metadata.
    pub async fn get_object_metadata(&self, container: &str, key: &str) -> StorageResult<Object> {
        self.ensure_container_name_safe(container)?;
        self.ensure_key_safe(key)?;
        self.find_object(container, key)
            .await?
            .ok_or_else(|| StorageError::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl Uploader for StorageService {
    async fn upload(
        &self,
        local_file: &Path,
        container: &str,
        remote_path: &str,
        overwrite: bool,
    ) -> StorageResult<String> {
        let file_name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(StorageError::InvalidObjectKey)?;
        let key = object_key(remote_path, file_name);
        self.ensure_container_name_safe(container)?;
        self.ensure_key_safe(&key)?;

        if let Some(existing) = self.find_object(container, &key).await? {
            let local_etag = file_etag(local_file).await?;
            if existing.etag == local_etag {
                debug!(container, key = %key, "identical object already stored");
                return self.public_url(container, &key);
            }
            if !overwrite {
                return Err(StorageError::ObjectExists {
                    container: container.to_string(),
                    key,
                });
            }
        }

        let file = File::open(local_file).await?;
        let object = self
            .upload_object_stream(
                container,
                &key,
                Some(content_type_for(file_name).to_string()),
                ReaderStream::new(file),
            )
            .await?;

        info!(
            container,
            key = %object.key,
            size = object.size_bytes,
            etag = %object.etag,
            "object uploaded"
        );
        self.public_url(container, &object.key)
    }
}

/// `remote_path/file_name`, ignoring leading/trailing slashes on the path.
fn object_key(remote_path: &str, file_name: &str) -> String {
    let prefix = remote_path.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Hex MD5 of a local file, read in chunks.
async fn file_etag(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}
