//! Metadata store interface
//!
//! The engine and facade only ever see this trait; the Postgres
//! implementation lives in `waypoint-db`. Deadlines are enforced by callers
//! (the worker wraps each job in its five-minute timeout), so the methods
//! carry no explicit deadline parameter.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Derivative, ImageAsset, ProcessingJob, ProcessingStatus};

#[async_trait]
pub trait ImagingRepository: Send + Sync {
    /// Insert an asset, or update it in place when the id already exists
    /// (reprocessing reuses the id and must persist the bumped version).
    /// A same-hash insert under a different id fails with
    /// [`PipelineError::Conflict`].
    async fn create_asset(&self, asset: &ImageAsset) -> Result<(), PipelineError>;

    /// Update status and error message; sets `processed_at` iff the new
    /// status is terminal.
    async fn update_asset_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError>;

    /// Look up by content hash, hydrating derivatives. `None` when absent.
    async fn get_asset_by_hash(&self, hash: &str) -> Result<Option<ImageAsset>, PipelineError>;

    /// Look up by id, hydrating derivatives. `None` when absent.
    async fn get_asset_by_id(&self, id: Uuid) -> Result<Option<ImageAsset>, PipelineError>;

    /// Insert-only; one row per (asset, rendition, format) and version.
    async fn create_derivative(&self, derivative: &Derivative) -> Result<(), PipelineError>;

    async fn create_job(&self, job: &ProcessingJob) -> Result<(), PipelineError>;

    async fn update_job(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        asset_id: Option<Uuid>,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<(), PipelineError>;

    /// All rows with `status = pending`, oldest first. Startup recovery
    /// re-enqueues exactly this set.
    async fn get_pending_jobs(&self) -> Result<Vec<ProcessingJob>, PipelineError>;

    async fn get_job_by_id(&self, id: Uuid) -> Result<Option<ProcessingJob>, PipelineError>;
}
