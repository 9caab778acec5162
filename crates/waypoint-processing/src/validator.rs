//! Upload validation: format sniffing, size and dimension caps, content
//! hashing, alpha probing.
//!
//! The declared Content-Type is never trusted; the format comes from magic
//! bytes alone.

use image::ImageReader;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Cursor;
use waypoint_core::PipelineError;

/// 15 MiB cap, all categories.
pub const MAX_BYTES: u64 = 15 * 1024 * 1024;
/// Max width or height in pixels.
pub const MAX_DIMENSION: u32 = 6000;
/// Decompression-bomb guard: 64 megapixels.
pub const MAX_PIXELS: u64 = 64 * 1024 * 1024;

/// Source format detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Heic,
    Avif,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Png => "png",
            SourceFormat::Gif => "gif",
            SourceFormat::Webp => "webp",
            SourceFormat::Heic => "heic",
            SourceFormat::Avif => "avif",
        }
    }

    /// Formats the `image` decoder stack cannot open; their dimension checks
    /// are deferred to processing.
    fn header_decode_optional(&self) -> bool {
        matches!(self, SourceFormat::Heic | SourceFormat::Avif)
    }
}

impl Display for SourceFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Per-category upload limits. Uniform today; the indirection keeps the
/// policy in one place if categories ever diverge.
#[derive(Debug, Clone, Copy)]
pub struct CategoryLimits {
    pub max_bytes: u64,
    pub max_dimension: u32,
}

pub fn category_limits(_category: &str) -> CategoryLimits {
    CategoryLimits {
        max_bytes: MAX_BYTES,
        max_dimension: MAX_DIMENSION,
    }
}

/// Everything the pipeline needs to know about a validated upload.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub width: u32,
    pub height: u32,
    pub format: SourceFormat,
    pub has_alpha: bool,
    pub size: u64,
    /// Lowercase hex SHA-256 of the raw bytes.
    pub content_hash: String,
}

/// Detect the image format from magic bytes. Returns `None` for anything
/// outside the accepted set.
pub fn detect_format(data: &[u8]) -> Option<SourceFormat> {
    if data.len() < 12 {
        return None;
    }

    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(SourceFormat::Jpeg);
    }
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(SourceFormat::Png);
    }
    if data.starts_with(b"GIF8") {
        return Some(SourceFormat::Gif);
    }
    // WebP: RIFF....WEBP
    if data[0..4] == *b"RIFF" && data[8..12] == *b"WEBP" {
        return Some(SourceFormat::Webp);
    }
    // HEIC / AVIF: ISO BMFF ftyp box brand
    if data[4..8] == *b"ftyp" {
        return match &data[8..12] {
            b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" => Some(SourceFormat::Heic),
            b"avif" | b"avis" => Some(SourceFormat::Avif),
            _ => None,
        };
    }

    None
}

/// Compute the content hash used for deduplication.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Validate upload bytes against the category's limits.
pub fn validate(data: &[u8], category: &str) -> Result<ValidationReport, PipelineError> {
    let limits = category_limits(category);
    let size = data.len() as u64;

    if size > limits.max_bytes {
        return Err(PipelineError::Validation(format!(
            "file size {} exceeds maximum {} bytes",
            size, limits.max_bytes
        )));
    }

    let format = detect_format(data).ok_or_else(|| {
        PipelineError::Validation("unable to detect image format".to_string())
    })?;

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PipelineError::Validation(format!("failed to read image header: {e}")))?;

    let (width, height) = match reader.into_dimensions() {
        Ok(dims) => dims,
        // HEIC (and AVIF without a decoder) can't be opened here; dimensions
        // are checked during processing instead.
        Err(_) if format.header_decode_optional() => (0, 0),
        Err(e) => {
            return Err(PipelineError::Validation(format!(
                "failed to decode image: {e}"
            )))
        }
    };

    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(PipelineError::Validation(format!(
            "image dimensions {}x{} exceed maximum {}",
            width, height, limits.max_dimension
        )));
    }

    if (width as u64) * (height as u64) > MAX_PIXELS {
        return Err(PipelineError::Validation(
            "image too large (potential decompression bomb)".to_string(),
        ));
    }

    let hash = content_hash(data);

    // Full decode only for the alpha probe; formats we cannot decode are
    // treated as opaque.
    let has_alpha = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()
        .and_then(|r| r.decode().ok())
        .map(|img| img.color().has_alpha())
        .unwrap_or(false);

    Ok(ValidationReport {
        width,
        height,
        format,
        has_alpha,
        size,
        content_hash: hash,
    })
}
