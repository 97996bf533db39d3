//! Batch status persistence in SQLite.

use crate::models::status::{BatchStatus, DialcodeBatch};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Table the pipeline writes batch outcomes to.
pub const DIALCODE_BATCH_TABLE: &str = "dialcode_batch";
/// Key column of [`DIALCODE_BATCH_TABLE`].
pub const PROCESS_ID_COLUMN: &str = "processid";

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("`{0}` is not a valid table or column name")]
    InvalidIdentifier(String),
    #[error("no row in `{table}` where {key_column} = `{key_value}`")]
    NotConfirmed {
        table: String,
        key_column: String,
        key_value: String,
    },
    #[error("status store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type StatusResult<T> = Result<T, StatusError>;

/// Writes a single-row status update.
#[async_trait]
pub trait StatusRecorder: Send + Sync {
    /// Set `status` and `url` on the row of `table` where `key_column = key_value`.
    async fn record_status(
        &self,
        table: &str,
        status: BatchStatus,
        url: &str,
        key_column: &str,
        key_value: &str,
    ) -> StatusResult<()>;
}

#[derive(Clone)]
pub struct SqliteStatusStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteStatusStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a pending batch row. Existing rows are left untouched.
    pub async fn register_batch(&self, process_id: &str) -> StatusResult<DialcodeBatch> {
        sqlx::query(
            "INSERT INTO dialcode_batch (processid, status, url, updated_at)
             VALUES (?, ?, NULL, ?)
             ON CONFLICT(processid) DO NOTHING",
        )
        .bind(process_id)
        .bind(BatchStatus::Pending.code())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        self.fetch_batch(process_id)
            .await?
            .ok_or_else(|| StatusError::NotConfirmed {
                table: DIALCODE_BATCH_TABLE.into(),
                key_column: PROCESS_ID_COLUMN.into(),
                key_value: process_id.into(),
            })
    }

    pub async fn fetch_batch(&self, process_id: &str) -> StatusResult<Option<DialcodeBatch>> {
        let batch = sqlx::query_as::<_, DialcodeBatch>(
            "SELECT processid, status, url, updated_at FROM dialcode_batch WHERE processid = ?",
        )
        .bind(process_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(batch)
    }
}

#[async_trait]
impl StatusRecorder for SqliteStatusStore {
    async fn record_status(
        &self,
        table: &str,
        status: BatchStatus,
        url: &str,
        key_column: &str,
        key_value: &str,
    ) -> StatusResult<()> {
        ensure_identifier(table)?;
        ensure_identifier(key_column)?;

        let sql = format!(
            "UPDATE {} SET status = ?, url = ?, updated_at = ? WHERE {} = ?",
            table, key_column
        );
        let result = sqlx::query(&sql)
            .bind(status.code())
            .bind(url)
            .bind(Utc::now())
            .bind(key_value)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StatusError::NotConfirmed {
                table: table.to_string(),
                key_column: key_column.to_string(),
                key_value: key_value.to_string(),
            });
        }

        debug!(table, key_value, status = ?status, "status recorded");
        Ok(())
    }
}

/// Identifiers are interpolated into SQL, so only `[A-Za-z0-9_]` is allowed.
fn ensure_identifier(name: &str) -> StatusResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StatusError::InvalidIdentifier(name.to_string()))
    }
}
