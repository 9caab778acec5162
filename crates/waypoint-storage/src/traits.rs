//! Blob store abstraction trait
//!
//! The engine and the HTTP layer talk to the blob store through this trait;
//! the R2/S3 implementation lives in [`crate::s3`], and tests inject
//! in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;
use waypoint_core::PipelineError;

/// Blob store operation errors, classified by what the caller should do.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Network blip, 5xx, timeout. Worth retrying.
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("permanent storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => PipelineError::NotFound(msg),
            StorageError::Unauthorized(msg) => PipelineError::Unauthorized(msg),
            StorageError::Transient(msg) => PipelineError::Transient(msg),
            StorageError::Permanent(msg) => PipelineError::Permanent(msg),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A presigned PUT grant handed to the uploading client.
#[derive(Debug, Clone)]
pub struct PresignedUpload {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Object storage operations the pipeline needs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Produce a URL the caller can PUT to directly. The content type and
    /// the content-length cap are part of the signature, so an upload that
    /// lies about either is rejected by the store itself.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        max_bytes: i64,
        ttl: Duration,
    ) -> StorageResult<PresignedUpload>;

    /// Fetch a whole object into memory.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Fetch an object as a byte stream plus its total size, for proxying
    /// without buffering.
    async fn get_stream(
        &self,
        key: &str,
    ) -> StorageResult<(BoxStream<'static, StorageResult<Bytes>>, u64)>;

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Copy then delete. Not atomic; callers treat it as best-effort.
    async fn move_object(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Public (CDN-facing) URL for a key.
    fn public_url(&self, key: &str) -> String;
}
