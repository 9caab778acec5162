use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status shared by assets and processing jobs.
///
/// Persisted as lowercase text and used verbatim on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Downloading,
    Processing,
    Uploading,
    Ready,
    Failed,
}

impl ProcessingStatus {
    /// Terminal statuses: no worker will touch the row again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Ready | ProcessingStatus::Failed)
    }
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Downloading => write!(f, "downloading"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Uploading => write!(f, "uploading"),
            ProcessingStatus::Ready => write!(f, "ready"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "downloading" => Ok(ProcessingStatus::Downloading),
            "processing" => Ok(ProcessingStatus::Processing),
            "uploading" => Ok(ProcessingStatus::Uploading),
            "ready" => Ok(ProcessingStatus::Ready),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(anyhow::anyhow!("invalid processing status: {}", s)),
        }
    }
}

/// A content-addressed image asset: one row per distinct SHA-256 of the
/// original bytes. Owns its derivatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAsset {
    pub id: Uuid,
    pub content_hash: String,
    pub original_width: i32,
    pub original_height: i32,
    pub original_format: String,
    pub original_size: i64,
    pub has_alpha: bool,
    pub category: String,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Bumped by one on every reprocess; never decreases.
    pub version: i32,
    /// Hydrated alongside the asset row; not a column.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub derivatives: Vec<Derivative>,
    pub created_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for ImageAsset {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(ImageAsset {
            id: row.get("id"),
            content_hash: row.get("content_hash"),
            original_width: row.get("original_width"),
            original_height: row.get("original_height"),
            original_format: row.get("original_format"),
            original_size: row.get("original_size"),
            has_alpha: row.get("has_alpha"),
            category: row.get("category"),
            status: row.get("status"),
            error_message: row.get("error_message"),
            version: row.get("version"),
            derivatives: Vec::new(),
            created_by_user_id: row.get("created_by_user_id"),
            created_at: row.get("created_at"),
            processed_at: row.get("processed_at"),
        })
    }
}

/// One resized-and-reencoded output: one row per (asset, rendition, format).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Derivative {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub rendition_name: String,
    pub format: String,
    pub width: i32,
    pub height: i32,
    pub size_bytes: i64,
    pub storage_key: String,
}
