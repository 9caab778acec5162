//! Core types for the waypoint image pipeline: configuration, the error
//! taxonomy, domain models, and the metadata-store interface.

pub mod config;
pub mod error;
pub mod models;
pub mod repository;

pub use config::{BlobConfig, Config};
pub use error::PipelineError;
pub use repository::ImagingRepository;
