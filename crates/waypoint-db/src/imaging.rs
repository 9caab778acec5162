//! Postgres metadata store for assets, derivatives, and processing jobs.
//!
//! Dynamic (non-macro) queries so the crate builds without a live
//! `DATABASE_URL`. Tables: `image_assets`, `image_derivatives`,
//! `image_processing_jobs`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use waypoint_core::models::{CropConfig, Derivative, ImageAsset, ProcessingJob, ProcessingStatus};
use waypoint_core::{ImagingRepository, PipelineError};

#[derive(Clone)]
pub struct PgImagingRepository {
    pool: PgPool,
}

impl PgImagingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn get_derivatives(&self, asset_id: Uuid) -> Result<Vec<Derivative>, PipelineError> {
        let derivatives = sqlx::query_as::<_, Derivative>(
            r#"
            SELECT id, asset_id, rendition_name, format, width, height, size_bytes, storage_key
            FROM image_derivatives
            WHERE asset_id = $1
            ORDER BY rendition_name, format
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(derivatives)
    }

    async fn hydrate(
        &self,
        asset: Option<ImageAsset>,
    ) -> Result<Option<ImageAsset>, PipelineError> {
        match asset {
            Some(mut asset) => {
                asset.derivatives = self.get_derivatives(asset.id).await?;
                Ok(Some(asset))
            }
            None => Ok(None),
        }
    }
}

const ASSET_COLUMNS: &str = r#"
    id, content_hash, original_width, original_height, original_format,
    original_size, has_alpha, category, status, error_message, version,
    created_by_user_id, created_at, processed_at
"#;

#[async_trait]
impl ImagingRepository for PgImagingRepository {
    #[tracing::instrument(skip(self, asset), fields(asset_id = %asset.id, content_hash = %asset.content_hash))]
    async fn create_asset(&self, asset: &ImageAsset) -> Result<(), PipelineError> {
        // Upsert on id: reprocessing reuses the asset id and must persist the
        // bumped version. A same-hash insert under a different id still hits
        // the content_hash unique index and surfaces as Conflict.
        sqlx::query(
            r#"
            INSERT INTO image_assets (
                id, content_hash, original_width, original_height, original_format,
                original_size, has_alpha, category, status, error_message, version,
                created_by_user_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                original_width = EXCLUDED.original_width,
                original_height = EXCLUDED.original_height,
                original_format = EXCLUDED.original_format,
                original_size = EXCLUDED.original_size,
                has_alpha = EXCLUDED.has_alpha,
                category = EXCLUDED.category,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                version = EXCLUDED.version,
                processed_at = NULL
            "#,
        )
        .bind(asset.id)
        .bind(&asset.content_hash)
        .bind(asset.original_width)
        .bind(asset.original_height)
        .bind(&asset.original_format)
        .bind(asset.original_size)
        .bind(asset.has_alpha)
        .bind(&asset.category)
        .bind(asset.status)
        .bind(&asset.error_message)
        .bind(asset.version)
        .bind(asset.created_by_user_id)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update_asset_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        let processed_at = status.is_terminal().then(Utc::now);

        sqlx::query(
            r#"
            UPDATE image_assets
            SET status = $2, error_message = $3, processed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_asset_by_hash(&self, hash: &str) -> Result<Option<ImageAsset>, PipelineError> {
        let asset = sqlx::query_as::<_, ImageAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM image_assets WHERE content_hash = $1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(asset).await
    }

    async fn get_asset_by_id(&self, id: Uuid) -> Result<Option<ImageAsset>, PipelineError> {
        let asset = sqlx::query_as::<_, ImageAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM image_assets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(asset).await
    }

    #[tracing::instrument(skip(self, derivative), fields(storage_key = %derivative.storage_key))]
    async fn create_derivative(&self, derivative: &Derivative) -> Result<(), PipelineError> {
        // Reprocessing rewrites the row for (asset, rendition, format) to the
        // new version's key; prior objects stay addressable in the blob store
        // by their explicit versioned keys.
        sqlx::query(
            r#"
            INSERT INTO image_derivatives (
                id, asset_id, rendition_name, format, width, height, size_bytes, storage_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (asset_id, rendition_name, format) DO UPDATE SET
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                size_bytes = EXCLUDED.size_bytes,
                storage_key = EXCLUDED.storage_key
            "#,
        )
        .bind(derivative.id)
        .bind(derivative.asset_id)
        .bind(&derivative.rendition_name)
        .bind(&derivative.format)
        .bind(derivative.width)
        .bind(derivative.height)
        .bind(derivative.size_bytes)
        .bind(&derivative.storage_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, upload_key = %job.upload_key))]
    async fn create_job(&self, job: &ProcessingJob) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO image_processing_jobs (
                id, upload_key, category, user_id, asset_id, status, attempts,
                last_error, crop_data, is_reprocess, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id)
        .bind(&job.upload_key)
        .bind(&job.category)
        .bind(job.user_id)
        .bind(job.asset_id)
        .bind(job.status)
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.crop_data.map(sqlx::types::Json::<CropConfig>))
        .bind(job.is_reprocess)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update_job(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        asset_id: Option<Uuid>,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<(), PipelineError> {
        // COALESCE keeps an already-linked asset_id stable when callers pass
        // None on later transitions.
        sqlx::query(
            r#"
            UPDATE image_processing_jobs
            SET status = $2,
                asset_id = COALESCE($3, asset_id),
                attempts = $4,
                last_error = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(asset_id)
        .bind(attempts)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_pending_jobs(&self) -> Result<Vec<ProcessingJob>, PipelineError> {
        let jobs = sqlx::query_as::<_, ProcessingJob>(
            r#"
            SELECT id, upload_key, category, user_id, asset_id, status, attempts,
                   last_error, crop_data, is_reprocess, created_at, updated_at
            FROM image_processing_jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn get_job_by_id(&self, id: Uuid) -> Result<Option<ProcessingJob>, PipelineError> {
        let job = sqlx::query_as::<_, ProcessingJob>(
            r#"
            SELECT id, upload_key, category, user_id, asset_id, status, attempts,
                   last_error, crop_data, is_reprocess, created_at, updated_at
            FROM image_processing_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }
}
