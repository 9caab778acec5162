//! Processing engine: durable job queue, worker pool, and the pipeline
//! facade the HTTP layer calls.
//!
//! Jobs are written to the metadata store before they are enqueued, so the
//! in-memory channel can be lossy under pressure: anything that reached the
//! store is re-enqueued by startup recovery. Shutdown stops the dispatcher;
//! in-flight jobs run to their next durable transition and are resumed from
//! that status on restart.

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use uuid::Uuid;

use waypoint_core::models::{
    CropConfig, Derivative, ImageAsset, ProcessingJob, ProcessingStatus,
};
use waypoint_core::{Config, ImagingRepository, PipelineError};
use waypoint_processing::{Category, ImageProcessor, OutputFormat, ValidationReport};
use waypoint_storage::{keys, BlobStore};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub job_timeout: Duration,
    pub upload_concurrency: usize,
    /// Delay before startup recovery reads pending jobs, giving the rest of
    /// the process time to finish wiring up.
    pub recovery_settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: waypoint_core::config::default_worker_count(),
            queue_capacity: 1000,
            max_attempts: 3,
            job_timeout: Duration::from_secs(300),
            upload_concurrency: 10,
            recovery_settle_delay: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            queue_capacity: config.job_queue_capacity,
            max_attempts: config.max_job_attempts,
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            upload_concurrency: config.upload_concurrency,
            ..Default::default()
        }
    }
}

/// Backoff before re-enqueueing a failed attempt.
pub(crate) fn retry_backoff(attempts: u32) -> Duration {
    Duration::from_secs((attempts as u64).pow(2))
}

/// Everything a worker task needs; shared behind one Arc.
struct WorkerCtx {
    repo: Arc<dyn ImagingRepository>,
    store: Arc<dyn BlobStore>,
    processor: ImageProcessor,
    config: EngineConfig,
    job_tx: mpsc::Sender<ProcessingJob>,
}

/// The engine and the public entry points used by the HTTP layer.
#[derive(Clone)]
pub struct ProcessingEngine {
    ctx: Arc<WorkerCtx>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ProcessingEngine {
    /// Start the worker pool and the pending-job recovery task.
    pub fn new(
        repo: Arc<dyn ImagingRepository>,
        store: Arc<dyn BlobStore>,
        config: EngineConfig,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let ctx = Arc::new(WorkerCtx {
            repo,
            store,
            processor: ImageProcessor::new(config.worker_count),
            config,
            job_tx,
        });

        tokio::spawn(Self::dispatch_loop(ctx.clone(), job_rx, shutdown_rx));
        tokio::spawn(Self::recover_pending_jobs(ctx.clone()));

        Self { ctx, shutdown_tx }
    }

    /// Signal the dispatcher to stop claiming jobs. In-flight jobs keep
    /// running until their next durable transition.
    pub async fn shutdown(&self) {
        tracing::info!("processing engine shutting down");
        let _ = self.shutdown_tx.send(()).await;
    }

    // ----- facade -----

    /// Queue a freshly staged upload for processing. The key must live under
    /// the caller's staging prefix.
    #[tracing::instrument(skip(self))]
    pub async fn queue_processing(
        &self,
        upload_key: &str,
        category: &str,
        user_id: Uuid,
        crop: Option<CropConfig>,
    ) -> Result<Uuid, PipelineError> {
        if !upload_key.starts_with(&keys::staging_prefix(user_id)) {
            return Err(PipelineError::Unauthorized(
                "upload key does not belong to this user".to_string(),
            ));
        }
        self.enqueue_job(ProcessingJob::new(
            upload_key.to_string(),
            category.to_string(),
            user_id,
            crop,
            false,
        ))
        .await
    }

    /// Queue a reprocess of an existing asset from its canonical original.
    #[tracing::instrument(skip(self))]
    pub async fn queue_reprocessing(
        &self,
        original_key: &str,
        category: &str,
        user_id: Uuid,
        crop: Option<CropConfig>,
    ) -> Result<Uuid, PipelineError> {
        if !original_key.starts_with("originals/") {
            return Err(PipelineError::Unauthorized(
                "reprocessing requires a canonical original key".to_string(),
            ));
        }
        self.enqueue_job(ProcessingJob::new(
            original_key.to_string(),
            category.to_string(),
            user_id,
            crop,
            true,
        ))
        .await
    }

    pub async fn get_asset_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<ImageAsset>, PipelineError> {
        self.ctx.repo.get_asset_by_hash(hash).await
    }

    pub async fn get_asset_by_id(&self, id: Uuid) -> Result<Option<ImageAsset>, PipelineError> {
        self.ctx.repo.get_asset_by_id(id).await
    }

    pub async fn get_job_by_id(&self, id: Uuid) -> Result<Option<ProcessingJob>, PipelineError> {
        self.ctx.repo.get_job_by_id(id).await
    }

    /// Resolve the storage key and format to serve for a rendition of the
    /// asset with this content hash.
    pub async fn get_derivative_key(
        &self,
        hash: &str,
        rendition: &str,
        preferred: Option<OutputFormat>,
    ) -> Result<(String, String), PipelineError> {
        let asset = self
            .ctx
            .repo
            .get_asset_by_hash(hash)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("asset {hash}")))?;
        crate::resolve::resolve_derivative(&asset, rendition, preferred)
    }

    /// Write the job row first, then enqueue. A full channel is fine: the
    /// pending row is picked up by recovery on the next restart.
    async fn enqueue_job(&self, job: ProcessingJob) -> Result<Uuid, PipelineError> {
        self.ctx.repo.create_job(&job).await?;
        let job_id = job.id;

        if let Err(err) = self.ctx.job_tx.try_send(job) {
            tracing::warn!(
                job_id = %job_id,
                error = %err,
                "job channel full, job stays pending until recovery"
            );
        }

        Ok(job_id)
    }

    // ----- worker pool -----

    async fn dispatch_loop(
        ctx: Arc<WorkerCtx>,
        mut job_rx: mpsc::Receiver<ProcessingJob>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            worker_count = ctx.config.worker_count,
            queue_capacity = ctx.config.queue_capacity,
            "processing engine started"
        );

        let workers = Arc::new(Semaphore::new(ctx.config.worker_count));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                job = job_rx.recv() => {
                    let Some(job) = job else { break };
                    let permit = match workers.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::handle_job(ctx, job).await;
                    });
                }
            }
        }

        tracing::info!("processing engine dispatcher stopped");
    }

    /// Crash-recovery contract: every job row that reached the store in
    /// `pending` is re-enqueued here with a blocking send, so none are
    /// dropped.
    async fn recover_pending_jobs(ctx: Arc<WorkerCtx>) {
        tokio::time::sleep(ctx.config.recovery_settle_delay).await;

        let jobs = match ctx.repo.get_pending_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::error!(error = %err, "failed to read pending jobs for recovery");
                return;
            }
        };

        if jobs.is_empty() {
            return;
        }
        tracing::info!(count = jobs.len(), "re-enqueueing pending jobs");

        for job in jobs {
            let job_id = job.id;
            if ctx.job_tx.send(job).await.is_err() {
                tracing::warn!(job_id = %job_id, "engine stopped during recovery");
                return;
            }
        }
    }

    async fn handle_job(ctx: Arc<WorkerCtx>, mut job: ProcessingJob) {
        let job_id = job.id;
        tracing::info!(job_id = %job_id, upload_key = %job.upload_key, attempts = job.attempts, "worker picked up job");

        let deadline = ctx.config.job_timeout;
        let result = AssertUnwindSafe(tokio::time::timeout(
            deadline,
            Self::process_job(&ctx, &mut job),
        ))
        .catch_unwind()
        .await;

        let outcome: Result<(), PipelineError> = match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_elapsed)) => Err(PipelineError::Transient(format!(
                "job exceeded {}s deadline",
                deadline.as_secs()
            ))),
            Err(panic) => Err(PipelineError::Permanent(format!(
                "worker panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match outcome {
            Ok(()) => tracing::info!(job_id = %job_id, "job completed"),
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "job failed");
                Self::handle_failure(&ctx, job, err).await;
            }
        }
    }

    /// The per-job pipeline: download, validate, dedup, transform, upload,
    /// record, move, flip statuses.
    async fn process_job(
        ctx: &Arc<WorkerCtx>,
        job: &mut ProcessingJob,
    ) -> Result<(), PipelineError> {
        job.attempts += 1;

        // 1. Download the staged original.
        ctx.repo
            .update_job(
                job.id,
                ProcessingStatus::Downloading,
                None,
                job.attempts,
                None,
            )
            .await?;
        let data = ctx.store.get(&job.upload_key).await?;

        // 2. Validate bytes; failures here are terminal for the job.
        let report = waypoint_processing::validate(&data, &job.category)?;

        // 3. Dedup by content hash.
        let existing = ctx.repo.get_asset_by_hash(&report.content_hash).await?;
        let (asset_id, version, created_at) = match &existing {
            Some(asset) if asset.status == ProcessingStatus::Ready && !job.is_reprocess => {
                tracing::debug!(
                    job_id = %job.id,
                    asset_id = %asset.id,
                    content_hash = %report.content_hash,
                    "asset already processed, linking job"
                );
                ctx.repo
                    .update_job(
                        job.id,
                        ProcessingStatus::Ready,
                        Some(asset.id),
                        job.attempts,
                        None,
                    )
                    .await?;
                // The staged bytes duplicate the stored original.
                Self::best_effort_delete(ctx, &job.upload_key).await;
                return Ok(());
            }
            Some(asset) => (asset.id, asset.version + 1, asset.created_at),
            None => (Uuid::new_v4(), 1, Utc::now()),
        };

        // 4. Create or refresh the asset record.
        let mut asset = ImageAsset {
            id: asset_id,
            content_hash: report.content_hash.clone(),
            original_width: report.width as i32,
            original_height: report.height as i32,
            original_format: report.format.as_str().to_string(),
            original_size: report.size as i64,
            has_alpha: report.has_alpha,
            category: job.category.clone(),
            status: ProcessingStatus::Processing,
            error_message: None,
            version,
            derivatives: Vec::new(),
            created_by_user_id: job.user_id,
            created_at,
            processed_at: None,
        };

        if let Err(err) = ctx.repo.create_asset(&asset).await {
            match err {
                // A concurrent job inserted the same hash first. Re-read and
                // proceed as if dedup had matched.
                PipelineError::Conflict(_) => {
                    let winner = ctx
                        .repo
                        .get_asset_by_hash(&report.content_hash)
                        .await?
                        .ok_or_else(|| {
                            PipelineError::Permanent(
                                "conflict on asset insert but hash not found".to_string(),
                            )
                        })?;
                    if winner.status == ProcessingStatus::Ready && !job.is_reprocess {
                        ctx.repo
                            .update_job(
                                job.id,
                                ProcessingStatus::Ready,
                                Some(winner.id),
                                job.attempts,
                                None,
                            )
                            .await?;
                        Self::best_effort_delete(ctx, &job.upload_key).await;
                        return Ok(());
                    }
                    asset.id = winner.id;
                    asset.version = winner.version + 1;
                    ctx.repo.create_asset(&asset).await?;
                }
                other => return Err(other),
            }
        }

        ctx.repo
            .update_job(
                job.id,
                ProcessingStatus::Processing,
                Some(asset.id),
                job.attempts,
                None,
            )
            .await?;

        // 5. Generate renditions.
        let category = Category::parse_or_general(&job.category);
        let processed = match ctx
            .processor
            .process(Bytes::from(data), category, report.has_alpha, job.crop_data)
            .await
        {
            Ok(processed) if processed.is_empty() => {
                let msg = "no renditions produced for source dimensions".to_string();
                ctx.repo
                    .update_asset_status(asset.id, ProcessingStatus::Failed, Some(&msg))
                    .await?;
                return Err(PipelineError::Permanent(msg));
            }
            Ok(processed) => processed,
            Err(err) => {
                ctx.repo
                    .update_asset_status(
                        asset.id,
                        ProcessingStatus::Failed,
                        Some(&err.to_string()),
                    )
                    .await?;
                return Err(err);
            }
        };

        // 6. Upload derivatives, bounded fan-out with mutex fan-in.
        ctx.repo
            .update_asset_status(asset.id, ProcessingStatus::Uploading, None)
            .await?;

        let uploaded = match Self::upload_derivatives(ctx, &asset, &report, processed).await {
            Ok(uploaded) => uploaded,
            Err(err) => {
                ctx.repo
                    .update_asset_status(
                        asset.id,
                        ProcessingStatus::Failed,
                        Some(&err.to_string()),
                    )
                    .await?;
                return Err(err);
            }
        };

        // 7. Record derivative rows. Best-effort: the object is already in
        // the store under a reproducible key.
        for derivative in &uploaded {
            if let Err(err) = ctx.repo.create_derivative(derivative).await {
                tracing::warn!(
                    storage_key = %derivative.storage_key,
                    error = %err,
                    "failed to record derivative, object remains in store"
                );
            }
        }

        // 8. Move the original to its canonical location.
        let original_key = keys::original_key(&report.content_hash);
        if job.upload_key != original_key {
            if let Err(err) = ctx.store.move_object(&job.upload_key, &original_key).await {
                tracing::warn!(
                    src = %job.upload_key,
                    dst = %original_key,
                    error = %err,
                    "failed to move original to canonical key"
                );
            }
        }

        // 9. Flip to ready; a clean run clears last_error.
        if let Err(err) = ctx
            .repo
            .update_asset_status(asset.id, ProcessingStatus::Ready, None)
            .await
        {
            tracing::warn!(asset_id = %asset.id, error = %err, "failed to mark asset ready");
        }
        ctx.repo
            .update_job(
                job.id,
                ProcessingStatus::Ready,
                Some(asset.id),
                job.attempts,
                None,
            )
            .await?;

        tracing::info!(
            job_id = %job.id,
            asset_id = %asset.id,
            version = asset.version,
            derivatives = uploaded.len(),
            "asset processed"
        );
        Ok(())
    }

    async fn upload_derivatives(
        ctx: &Arc<WorkerCtx>,
        asset: &ImageAsset,
        report: &ValidationReport,
        processed: Vec<waypoint_processing::ProcessedImage>,
    ) -> Result<Vec<Derivative>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(ctx.config.upload_concurrency));
        let derivatives = Arc::new(Mutex::new(Vec::with_capacity(processed.len())));

        let mut uploads = Vec::with_capacity(processed.len());
        for image in processed {
            let semaphore = semaphore.clone();
            let derivatives = derivatives.clone();
            let store = ctx.store.clone();
            let content_hash = report.content_hash.clone();
            let asset_id = asset.id;
            let version = asset.version;

            uploads.push(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    PipelineError::Permanent("upload semaphore closed".to_string())
                })?;

                let storage_key = keys::derivative_key(
                    &content_hash,
                    version,
                    &image.rendition_name,
                    image.format.as_str(),
                );
                let size_bytes = image.data.len() as i64;

                store
                    .put(&storage_key, image.data, image.format.mime_type())
                    .await?;

                derivatives.lock().await.push(Derivative {
                    id: Uuid::new_v4(),
                    asset_id,
                    rendition_name: image.rendition_name,
                    format: image.format.as_str().to_string(),
                    width: image.width as i32,
                    height: image.height as i32,
                    size_bytes,
                    storage_key,
                });
                Ok::<(), PipelineError>(())
            });
        }

        futures::future::try_join_all(uploads).await?;

        let uploaded = std::mem::take(&mut *derivatives.lock().await);
        Ok(uploaded)
    }

    async fn handle_failure(ctx: &Arc<WorkerCtx>, mut job: ProcessingJob, err: PipelineError) {
        job.last_error = Some(err.to_string());

        let will_retry = err.is_retryable() && job.attempts < ctx.config.max_attempts as i32;
        if will_retry {
            if let Err(update_err) = ctx
                .repo
                .update_job(
                    job.id,
                    ProcessingStatus::Pending,
                    None,
                    job.attempts,
                    job.last_error.as_deref(),
                )
                .await
            {
                tracing::error!(job_id = %job.id, error = %update_err, "failed to record retry state");
            }

            let delay = retry_backoff(job.attempts as u32);
            tracing::info!(
                job_id = %job.id,
                attempts = job.attempts,
                delay_secs = delay.as_secs(),
                "scheduling job retry"
            );

            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                job.status = ProcessingStatus::Pending;
                let job_id = job.id;
                if ctx.job_tx.try_send(job).is_err() {
                    tracing::warn!(
                        job_id = %job_id,
                        "retry channel full, job stays pending until recovery"
                    );
                }
            });
        } else {
            tracing::error!(
                job_id = %job.id,
                attempts = job.attempts,
                error = %err,
                "job permanently failed"
            );
            if let Err(update_err) = ctx
                .repo
                .update_job(
                    job.id,
                    ProcessingStatus::Failed,
                    None,
                    job.attempts,
                    job.last_error.as_deref(),
                )
                .await
            {
                tracing::error!(job_id = %job.id, error = %update_err, "failed to record job failure");
            }
        }
    }

    async fn best_effort_delete(ctx: &Arc<WorkerCtx>, key: &str) {
        if let Err(err) = ctx.store.delete(key).await {
            tracing::warn!(key = %key, error = %err, "failed to delete staging object");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
