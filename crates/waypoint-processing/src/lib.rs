//! Image validation, rendition policy, and transformation for the waypoint
//! pipeline.

pub mod encode;
pub mod processor;
pub mod rendition;
pub mod transform;
pub mod validator;

pub use processor::{ImageProcessor, ProcessedImage};
pub use rendition::{
    formats_for_rendition, renditions_for_category, Category, CropMode, OutputFormat,
    QualityLevel, QualitySettings, RenditionConfig,
};
pub use validator::{validate, ValidationReport};
