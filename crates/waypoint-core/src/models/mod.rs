mod asset;
mod job;

pub use asset::{Derivative, ImageAsset, ProcessingStatus};
pub use job::{CropConfig, ProcessingJob};
