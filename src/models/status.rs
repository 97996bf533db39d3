//! Batch completion status as stored in the `dialcode_batch` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status codes written to the status column.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Success,
    Failure,
}

impl BatchStatus {
    pub fn code(self) -> i64 {
        match self {
            BatchStatus::Pending => 0,
            BatchStatus::Success => 2,
            BatchStatus::Failure => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BatchStatus::Pending),
            2 => Some(BatchStatus::Success),
            3 => Some(BatchStatus::Failure),
            _ => None,
        }
    }
}

/// One row of the batch table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct DialcodeBatch {
    pub processid: String,

    /// Raw status code, see [`BatchStatus::code`].
    pub status: i64,

    /// Archive URL once the batch succeeded; empty on failure.
    pub url: Option<String>,

    pub updated_at: Option<DateTime<Utc>>,
}

impl DialcodeBatch {
    pub fn batch_status(&self) -> Option<BatchStatus> {
        BatchStatus::from_code(self.status)
    }
}
