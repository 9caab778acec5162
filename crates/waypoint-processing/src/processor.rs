//! The transformer: one source buffer in, a full rendition ladder out.
//!
//! Renditions run in parallel on the blocking pool, bounded by a semaphore
//! sized at construction. Within one rendition the working image is resized
//! once and each output format is encoded sequentially from it.

use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use waypoint_core::models::CropConfig;
use waypoint_core::PipelineError;

use crate::encode::encode;
use crate::rendition::{
    formats_for_rendition, renditions_for_category, Category, OutputFormat, RenditionConfig,
};
use crate::transform::{apply_crop_config, apply_rendition};

/// One encoded rendition output.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub rendition_name: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// Image transformation service. Constructed once at engine start; holds the
/// CPU concurrency limit for rendition work.
pub struct ImageProcessor {
    semaphore: Arc<Semaphore>,
}

impl ImageProcessor {
    pub fn new(parallelism: usize) -> Self {
        ImageProcessor {
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Generate every eligible rendition for the category, in all required
    /// formats. A failed rendition is logged and skipped; an error is
    /// returned only when renditions were attempted and all of them failed.
    pub async fn process(
        &self,
        data: Bytes,
        category: Category,
        has_alpha: bool,
        crop: Option<CropConfig>,
    ) -> Result<Vec<ProcessedImage>, PipelineError> {
        // Decode once; the source is shared read-only across rendition tasks.
        let src = tokio::task::spawn_blocking(move || decode_source(&data))
            .await
            .map_err(|e| PipelineError::Permanent(format!("decode task: {e}")))??;
        let src = Arc::new(src);
        let (src_w, src_h) = src.dimensions();

        let mut tasks = Vec::new();
        let mut attempted = 0usize;

        for rendition in renditions_for_category(category) {
            // No upscaling: skip when the source is strictly smaller than the
            // target on both axes.
            if rendition.width > src_w && rendition.height > src_h {
                tracing::debug!(
                    rendition = rendition.name,
                    src_width = src_w,
                    src_height = src_h,
                    "skipping rendition, source smaller than target"
                );
                continue;
            }

            attempted += 1;
            let src = Arc::clone(&src);
            let semaphore = Arc::clone(&self.semaphore);
            let rendition = *rendition;

            tasks.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err((rendition.name, anyhow::anyhow!("processor shut down")))
                    }
                };
                match tokio::task::spawn_blocking(move || {
                    process_rendition(&src, &rendition, has_alpha, crop.as_ref())
                })
                .await
                {
                    Ok(result) => result,
                    Err(join_err) => Err((
                        rendition.name,
                        anyhow::anyhow!("rendition task panicked: {join_err}"),
                    )),
                }
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(outputs)) => results.extend(outputs),
                Ok(Err((name, err))) => {
                    tracing::warn!(rendition = name, error = %err, "rendition failed, continuing");
                }
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "rendition task panicked, continuing");
                }
            }
        }

        if attempted > 0 && results.is_empty() {
            return Err(PipelineError::Permanent(
                "processing failed: all renditions failed".to_string(),
            ));
        }

        Ok(results)
    }
}

fn decode_source(data: &[u8]) -> Result<DynamicImage, PipelineError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PipelineError::Validation(format!("failed to read image header: {e}")))?
        .decode()
        .map_err(|e| PipelineError::Validation(format!("failed to decode image: {e}")))
}

type RenditionResult = Result<Vec<ProcessedImage>, (&'static str, anyhow::Error)>;

/// Produce one rendition in every required format. Runs on the blocking pool.
fn process_rendition(
    src: &DynamicImage,
    config: &RenditionConfig,
    has_alpha: bool,
    crop: Option<&CropConfig>,
) -> RenditionResult {
    let working = match crop {
        Some(c) => apply_crop_config(src, c),
        None => src.clone(),
    };
    let resized = apply_rendition(&working, config);
    let (width, height) = resized.dimensions();
    let quality = config.quality.settings();

    let mut outputs = Vec::new();
    for format in formats_for_rendition(has_alpha, config.skip_avif) {
        match encode(&resized, format, quality) {
            Ok(data) => outputs.push(ProcessedImage {
                rendition_name: config.name.to_string(),
                format,
                width,
                height,
                data,
            }),
            Err(err) => return Err((config.name, err.context(format!("encoding {format}")))),
        }
    }

    Ok(outputs)
}
