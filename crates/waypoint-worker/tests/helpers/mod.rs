//! In-memory repository and blob store for engine tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use waypoint_core::models::{Derivative, ImageAsset, ProcessingJob, ProcessingStatus};
use waypoint_core::{ImagingRepository, PipelineError};
use waypoint_storage::{BlobStore, PresignedUpload, StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryRepository {
    pub assets: Mutex<HashMap<Uuid, ImageAsset>>,
    pub derivatives: Mutex<Vec<Derivative>>,
    pub jobs: Mutex<HashMap<Uuid, ProcessingJob>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.lock().unwrap().len()
    }

    pub fn job(&self, id: Uuid) -> Option<ProcessingJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn insert_job(&self, job: ProcessingJob) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }
}

#[async_trait]
impl ImagingRepository for MemoryRepository {
    async fn create_asset(&self, asset: &ImageAsset) -> Result<(), PipelineError> {
        let mut assets = self.assets.lock().unwrap();
        // content_hash unique across different ids, like the DB index.
        if assets
            .values()
            .any(|a| a.content_hash == asset.content_hash && a.id != asset.id)
        {
            return Err(PipelineError::Conflict(format!(
                "duplicate content_hash {}",
                asset.content_hash
            )));
        }
        let mut stored = asset.clone();
        stored.derivatives = Vec::new();
        assets.insert(asset.id, stored);
        Ok(())
    }

    async fn update_asset_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        let mut assets = self.assets.lock().unwrap();
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| PipelineError::NotFound(format!("asset {id}")))?;
        asset.status = status;
        asset.error_message = error_message.map(str::to_string);
        asset.processed_at = status.is_terminal().then(Utc::now);
        Ok(())
    }

    async fn get_asset_by_hash(&self, hash: &str) -> Result<Option<ImageAsset>, PipelineError> {
        let assets = self.assets.lock().unwrap();
        let derivatives = self.derivatives.lock().unwrap();
        Ok(assets.values().find(|a| a.content_hash == hash).map(|a| {
            let mut asset = a.clone();
            asset.derivatives = derivatives
                .iter()
                .filter(|d| d.asset_id == a.id)
                .cloned()
                .collect();
            asset
        }))
    }

    async fn get_asset_by_id(&self, id: Uuid) -> Result<Option<ImageAsset>, PipelineError> {
        let assets = self.assets.lock().unwrap();
        let derivatives = self.derivatives.lock().unwrap();
        Ok(assets.get(&id).map(|a| {
            let mut asset = a.clone();
            asset.derivatives = derivatives
                .iter()
                .filter(|d| d.asset_id == a.id)
                .cloned()
                .collect();
            asset
        }))
    }

    async fn create_derivative(&self, derivative: &Derivative) -> Result<(), PipelineError> {
        let mut derivatives = self.derivatives.lock().unwrap();
        // Upsert on (asset, rendition, format), mirroring the Postgres query.
        if let Some(existing) = derivatives.iter_mut().find(|d| {
            d.asset_id == derivative.asset_id
                && d.rendition_name == derivative.rendition_name
                && d.format == derivative.format
        }) {
            *existing = derivative.clone();
        } else {
            derivatives.push(derivative.clone());
        }
        Ok(())
    }

    async fn create_job(&self, job: &ProcessingJob) -> Result<(), PipelineError> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        asset_id: Option<Uuid>,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<(), PipelineError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| PipelineError::NotFound(format!("job {id}")))?;
        job.status = status;
        if asset_id.is_some() {
            job.asset_id = asset_id;
        }
        job.attempts = attempts;
        job.last_error = last_error.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_pending_jobs(&self) -> Result<Vec<ProcessingJob>, PipelineError> {
        let jobs = self.jobs.lock().unwrap();
        let mut pending: Vec<ProcessingJob> = jobs
            .values()
            .filter(|j| j.status == ProcessingStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        Ok(pending)
    }

    async fn get_job_by_id(&self, id: Uuid) -> Result<Option<ProcessingJob>, PipelineError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, (Bytes, String)>>,
    /// Number of upcoming `get` calls that fail with a transient error.
    pub fail_next_gets: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_object(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Bytes::from(data), content_type.to_string()));
    }

    pub fn has_object(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn fail_gets(&self, count: usize) {
        self.fail_next_gets.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn presign_put(
        &self,
        key: &str,
        _content_type: &str,
        _max_bytes: i64,
        ttl: Duration,
    ) -> StorageResult<PresignedUpload> {
        Ok(PresignedUpload {
            url: format!("https://blob.test/{key}?signed"),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let remaining = self.fail_next_gets.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_gets.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Transient("injected get failure".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(data, _)| data.to_vec())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> StorageResult<(BoxStream<'static, StorageResult<Bytes>>, u64)> {
        let data = self.get(key).await?;
        let size = data.len() as u64;
        Ok((stream::iter([Ok(Bytes::from(data))]).boxed(), size))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let value = objects
            .get(src)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(src.to_string()))?;
        objects.insert(dst.to_string(), value);
        Ok(())
    }

    async fn move_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.copy(src, dst).await?;
        self.delete(src).await
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{key}")
    }
}
