use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProcessingStatus;

/// Caller-supplied crop rectangle in normalized [0, 1] coordinates, applied
/// before the rendition crop mode. Persisted as JSONB on the job row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CropConfig {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropConfig {
    /// A rectangle is usable when it lies inside the unit square and has area.
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.0
            && self.y + self.height <= 1.0
    }
}

/// Durable record of one pipeline invocation. Created by the facade,
/// mutated only by workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub upload_key: String,
    pub category: String,
    pub user_id: Uuid,
    /// Set once the job is linked to an asset; stable afterwards.
    pub asset_id: Option<Uuid>,
    pub status: ProcessingStatus,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_data: Option<CropConfig>,
    pub is_reprocess: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    /// A fresh job ready for enqueue.
    pub fn new(
        upload_key: String,
        category: String,
        user_id: Uuid,
        crop_data: Option<CropConfig>,
        is_reprocess: bool,
    ) -> Self {
        let now = Utc::now();
        ProcessingJob {
            id: Uuid::new_v4(),
            upload_key,
            category,
            user_id,
            asset_id: None,
            status: ProcessingStatus::Pending,
            attempts: 0,
            last_error: None,
            crop_data,
            is_reprocess,
            created_at: now,
            updated_at: now,
        }
    }
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for ProcessingJob {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let crop_data: Option<sqlx::types::Json<CropConfig>> = row.get("crop_data");
        Ok(ProcessingJob {
            id: row.get("id"),
            upload_key: row.get("upload_key"),
            category: row.get("category"),
            user_id: row.get("user_id"),
            asset_id: row.get("asset_id"),
            status: row.get("status"),
            attempts: row.get("attempts"),
            last_error: row.get("last_error"),
            crop_data: crop_data.map(|j| j.0),
            is_reprocess: row.get("is_reprocess"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
