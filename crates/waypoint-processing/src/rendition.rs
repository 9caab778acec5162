//! Rendition policy: which outputs each category gets.
//!
//! Pure, stateless tables. A rendition is a named target geometry plus a
//! crop mode and quality preset; the format set depends only on the alpha
//! channel and the per-rendition AVIF opt-out.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// High-level intent tag selecting a rendition ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Profile,
    Cover,
    Gallery,
    General,
}

impl Category {
    /// Unknown or empty categories fall back to the general ladder.
    pub fn parse_or_general(s: &str) -> Self {
        s.parse().unwrap_or(Category::General)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Profile => "profile",
            Category::Cover => "cover",
            Category::Gallery => "gallery",
            Category::General => "general",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(Category::Profile),
            "cover" => Ok(Category::Cover),
            "gallery" => Ok(Category::Gallery),
            "general" => Ok(Category::General),
            _ => Err(anyhow::anyhow!("invalid category: {}", s)),
        }
    }
}

/// How a rendition reaches its target geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropMode {
    /// Fit within the box, preserving aspect. Never upscales.
    None,
    /// Center-crop to a square, then scale to the target.
    CenterSquare,
    /// Center-crop to 16:9, then scale to the target.
    Center16x9,
    /// Scale to the target width, preserving aspect. Never upscales.
    FitWidth,
}

/// Compression quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLevel {
    High,
    Medium,
    Low,
}

impl QualityLevel {
    pub fn settings(&self) -> QualitySettings {
        match self {
            QualityLevel::High => QualitySettings {
                avif: 24,
                webp: 85.0,
                jpeg: 88,
            },
            QualityLevel::Medium => QualitySettings {
                avif: 30,
                webp: 78.0,
                jpeg: 82,
            },
            QualityLevel::Low => QualitySettings {
                avif: 36,
                webp: 70.0,
                jpeg: 75,
            },
        }
    }
}

/// Encoder quality values for one preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySettings {
    /// AVIF quantizer scale, 0-63, lower is better.
    pub avif: u8,
    /// WebP quality, 0-100, higher is better.
    pub webp: f32,
    /// JPEG quality, 0-100, higher is better.
    pub jpeg: u8,
}

impl QualitySettings {
    /// ravif takes quality on a 0-100 scale (higher is better); the preset
    /// stores the quantizer convention, so invert here.
    pub fn avif_encoder_quality(&self) -> f32 {
        100.0 - (self.avif as f32 / 63.0) * 100.0
    }
}

/// Output format of a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Avif,
    Webp,
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Avif => "avif",
            OutputFormat::Webp => "webp",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Avif => "image/avif",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    /// Delivery priority: modern formats first.
    pub const PRIORITY: [OutputFormat; 4] = [
        OutputFormat::Avif,
        OutputFormat::Webp,
        OutputFormat::Jpeg,
        OutputFormat::Png,
    ];
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avif" => Ok(OutputFormat::Avif),
            "webp" => Ok(OutputFormat::Webp),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            _ => Err(anyhow::anyhow!("invalid output format: {}", s)),
        }
    }
}

/// One entry in a category's rendition ladder.
#[derive(Debug, Clone, Copy)]
pub struct RenditionConfig {
    pub name: &'static str,
    pub width: u32,
    /// 0 keeps the aspect ratio (fit-width renditions).
    pub height: u32,
    pub crop_mode: CropMode,
    pub quality: QualityLevel,
    /// AVIF is not worth its encode cost for very small targets.
    pub skip_avif: bool,
}

const PROFILE_RENDITIONS: &[RenditionConfig] = &[
    RenditionConfig { name: "profile_48", width: 48, height: 48, crop_mode: CropMode::CenterSquare, quality: QualityLevel::High, skip_avif: true },
    RenditionConfig { name: "profile_96", width: 96, height: 96, crop_mode: CropMode::CenterSquare, quality: QualityLevel::High, skip_avif: true },
    RenditionConfig { name: "profile_200", width: 200, height: 200, crop_mode: CropMode::CenterSquare, quality: QualityLevel::High, skip_avif: false },
    RenditionConfig { name: "profile_400", width: 400, height: 400, crop_mode: CropMode::CenterSquare, quality: QualityLevel::Medium, skip_avif: false },
];

const COVER_RENDITIONS: &[RenditionConfig] = &[
    RenditionConfig { name: "cover_320", width: 320, height: 180, crop_mode: CropMode::Center16x9, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "cover_640", width: 640, height: 360, crop_mode: CropMode::Center16x9, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "cover_960", width: 960, height: 540, crop_mode: CropMode::Center16x9, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "cover_1200", width: 1200, height: 675, crop_mode: CropMode::Center16x9, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "cover_1920", width: 1920, height: 1080, crop_mode: CropMode::Center16x9, quality: QualityLevel::Medium, skip_avif: false },
];

const GALLERY_RENDITIONS: &[RenditionConfig] = &[
    RenditionConfig { name: "gallery_thumb", width: 150, height: 150, crop_mode: CropMode::CenterSquare, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "gallery_320", width: 320, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "gallery_640", width: 640, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "gallery_960", width: 960, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "gallery_1200", width: 1200, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "gallery_1920", width: 1920, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
];

const GENERAL_RENDITIONS: &[RenditionConfig] = &[
    RenditionConfig { name: "general_320", width: 320, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "general_640", width: 640, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "general_960", width: 960, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
    RenditionConfig { name: "general_1200", width: 1200, height: 0, crop_mode: CropMode::FitWidth, quality: QualityLevel::Medium, skip_avif: false },
];

/// The ordered rendition ladder for a category.
pub fn renditions_for_category(category: Category) -> &'static [RenditionConfig] {
    match category {
        Category::Profile => PROFILE_RENDITIONS,
        Category::Cover => COVER_RENDITIONS,
        Category::Gallery => GALLERY_RENDITIONS,
        Category::General => GENERAL_RENDITIONS,
    }
}

/// Output formats for one rendition. Alpha sources keep a lossless-alpha
/// fallback (PNG) instead of JPEG.
pub fn formats_for_rendition(has_alpha: bool, skip_avif: bool) -> Vec<OutputFormat> {
    let mut formats = Vec::with_capacity(3);
    if !skip_avif {
        formats.push(OutputFormat::Avif);
    }
    formats.push(OutputFormat::Webp);
    formats.push(if has_alpha {
        OutputFormat::Png
    } else {
        OutputFormat::Jpeg
    });
    formats
}
