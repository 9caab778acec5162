//! R2/S3 blob store implementation.
//!
//! The data plane (get/put/delete/copy/stream) runs on `object_store`; the
//! presigned-PUT path uses the AWS SDK because the signed request must pin
//! the content type and content-length cap, which `object_store`'s signer
//! cannot express.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, Error as ObjectStoreError, ObjectStore, PutOptions, PutPayload,
};
use std::time::Duration;
use waypoint_core::BlobConfig;

use crate::traits::{BlobStore, PresignedUpload, StorageError, StorageResult};

#[derive(Clone)]
pub struct R2Storage {
    store: AmazonS3,
    presign_client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: String,
    public_url: Option<String>,
}

impl R2Storage {
    pub fn new(config: &BlobConfig) -> StorageResult<Self> {
        let endpoint = config.endpoint();

        let store = AmazonS3Builder::new()
            .with_bucket_name(config.bucket_name.clone())
            .with_region("auto")
            .with_endpoint(endpoint.clone())
            .with_access_key_id(config.access_key_id.clone())
            .with_secret_access_key(config.secret_access_key.clone())
            .build()
            .map_err(|e| StorageError::Permanent(format!("building S3 store: {e}")))?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "waypoint",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(endpoint.clone())
            .credentials_provider(credentials)
            .build();

        Ok(R2Storage {
            store,
            presign_client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket: config.bucket_name.clone(),
            endpoint,
            public_url: config.public_url.clone(),
        })
    }

    fn map_err(err: ObjectStoreError, key: &str) -> StorageError {
        match err {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            ObjectStoreError::InvalidPath { .. } => StorageError::Permanent(err.to_string()),
            other => StorageError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
impl BlobStore for R2Storage {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        max_bytes: i64,
        ttl: Duration,
    ) -> StorageResult<PresignedUpload> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::Permanent(format!("presigning config: {e}")))?;

        let presigned = self
            .presign_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(max_bytes)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Transient(format!("presign PUT: {e}")))?;

        Ok(PresignedUpload {
            url: presigned.uri().to_string(),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let start = std::time::Instant::now();
        let location = Path::from(key);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| Self::map_err(e, key))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| Self::map_err(e, key))?;

        tracing::debug!(
            key = %key,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "blob store get"
        );

        Ok(bytes.to_vec())
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> StorageResult<(BoxStream<'static, StorageResult<Bytes>>, u64)> {
        let location = Path::from(key);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| Self::map_err(e, key))?;

        let size = result.meta.size as u64;
        let owned_key = key.to_string();
        let stream = result
            .into_stream()
            .map(move |chunk| chunk.map_err(|e| Self::map_err(e, &owned_key)))
            .boxed();

        Ok((stream, size))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let size = data.len();
        let location = Path::from(key);

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(data), opts)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    key = %key,
                    size_bytes = size,
                    "blob store put failed"
                );
                Self::map_err(e, key)
            })?;

        tracing::debug!(
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "blob store put"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let location = Path::from(key);
        self.store
            .delete(&location)
            .await
            .map_err(|e| Self::map_err(e, key))
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()> {
        let from = Path::from(src);
        let to = Path::from(dst);
        self.store
            .copy(&from, &to)
            .await
            .map_err(|e| Self::map_err(e, src))
    }

    async fn move_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.copy(src, dst).await?;
        self.delete(src).await?;
        tracing::debug!(src = %src, dst = %dst, "blob store move");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("{}/{}/{}", self.endpoint, self.bucket, key),
        }
    }
}
