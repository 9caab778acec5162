//! Blob store adapter for the waypoint pipeline: the [`BlobStore`] trait,
//! the R2/S3 implementation, and the shared key layout.

pub mod keys;
mod s3;
mod traits;

pub use s3::R2Storage;
pub use traits::{BlobStore, PresignedUpload, StorageError, StorageResult};
