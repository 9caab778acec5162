//! Geometry transforms: normalized crop extract and the rendition crop modes.
//!
//! All functions take the source by reference and return a new image; input
//! buffers are never mutated.

use image::imageops::FilterType;
use image::{imageops, DynamicImage, GenericImageView};
use waypoint_core::models::CropConfig;

use crate::rendition::{CropMode, RenditionConfig};

const FILTER: FilterType = FilterType::Lanczos3;

/// Apply a caller-supplied crop rectangle in normalized [0, 1] coordinates.
/// Degenerate rectangles fall back to the full frame.
pub fn apply_crop_config(img: &DynamicImage, crop: &CropConfig) -> DynamicImage {
    if !crop.is_valid() {
        return img.clone();
    }

    let (w, h) = img.dimensions();
    let x = (crop.x * w as f64).round() as u32;
    let y = (crop.y * h as f64).round() as u32;
    let cw = ((crop.width * w as f64).round() as u32).clamp(1, w.saturating_sub(x).max(1));
    let ch = ((crop.height * h as f64).round() as u32).clamp(1, h.saturating_sub(y).max(1));

    img.crop_imm(x.min(w - 1), y.min(h - 1), cw, ch)
}

/// Center-crop to the given box.
fn center_crop(img: &DynamicImage, crop_w: u32, crop_h: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let crop_w = crop_w.min(w);
    let crop_h = crop_h.min(h);
    let x = (w - crop_w) / 2;
    let y = (h - crop_h) / 2;
    img.crop_imm(x, y, crop_w, crop_h)
}

/// Apply a rendition's crop mode and scaling. Fit modes never upscale.
pub fn apply_rendition(img: &DynamicImage, config: &RenditionConfig) -> DynamicImage {
    let (w, h) = img.dimensions();

    match config.crop_mode {
        CropMode::CenterSquare => {
            let size = w.min(h);
            let cropped = center_crop(img, size, size);
            resize_exact(&cropped, config.width, config.height)
        }
        CropMode::Center16x9 => {
            // Wider than 16:9 crops width; taller crops height.
            let (crop_w, crop_h) = if w as u64 * 9 > h as u64 * 16 {
                ((h as u64 * 16 / 9) as u32, h)
            } else {
                (w, (w as u64 * 9 / 16) as u32)
            };
            let cropped = center_crop(img, crop_w.max(1), crop_h.max(1));
            resize_exact(&cropped, config.width, config.height)
        }
        CropMode::FitWidth => {
            if config.width >= w {
                return img.clone();
            }
            let target_h = ((h as u64 * config.width as u64) / w as u64).max(1) as u32;
            resize_exact(img, config.width, target_h)
        }
        CropMode::None => {
            if w <= config.width && h <= config.height {
                return img.clone();
            }
            img.resize(config.width, config.height, FILTER)
        }
    }
}

fn resize_exact(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w == width && h == height {
        return img.clone();
    }
    DynamicImage::ImageRgba8(imageops::resize(img, width, height, FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendition::QualityLevel;
    use image::{Rgba, RgbaImage};

    fn test_image(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 100, 50, 255])))
    }

    fn rendition(
        width: u32,
        height: u32,
        crop_mode: CropMode,
    ) -> RenditionConfig {
        RenditionConfig {
            name: "test",
            width,
            height,
            crop_mode,
            quality: QualityLevel::Medium,
            skip_avif: false,
        }
    }

    #[test]
    fn center_square_produces_target_geometry() {
        let out = apply_rendition(&test_image(400, 300), &rendition(96, 96, CropMode::CenterSquare));
        assert_eq!(out.dimensions(), (96, 96));
    }

    #[test]
    fn center_16x9_from_wide_source() {
        let out = apply_rendition(&test_image(2000, 500), &rendition(320, 180, CropMode::Center16x9));
        assert_eq!(out.dimensions(), (320, 180));
    }

    #[test]
    fn center_16x9_from_tall_source() {
        let out = apply_rendition(&test_image(500, 2000), &rendition(320, 180, CropMode::Center16x9));
        assert_eq!(out.dimensions(), (320, 180));
    }

    #[test]
    fn fit_width_preserves_aspect() {
        let out = apply_rendition(&test_image(800, 600), &rendition(320, 0, CropMode::FitWidth));
        assert_eq!(out.dimensions(), (320, 240));
    }

    #[test]
    fn fit_width_never_upscales() {
        let out = apply_rendition(&test_image(200, 150), &rendition(320, 0, CropMode::FitWidth));
        assert_eq!(out.dimensions(), (200, 150));
    }

    #[test]
    fn fit_within_never_upscales() {
        let out = apply_rendition(&test_image(100, 80), &rendition(320, 320, CropMode::None));
        assert_eq!(out.dimensions(), (100, 80));

        let shrunk = apply_rendition(&test_image(1000, 500), &rendition(320, 320, CropMode::None));
        let (w, h) = shrunk.dimensions();
        assert!(w <= 320 && h <= 320);
        assert_eq!(w, 320); // aspect preserved, width-bound
    }

    #[test]
    fn crop_config_extracts_expected_region() {
        let crop = CropConfig {
            x: 0.25,
            y: 0.25,
            width: 0.5,
            height: 0.5,
        };
        let out = apply_crop_config(&test_image(400, 200), &crop);
        assert_eq!(out.dimensions(), (200, 100));
    }

    #[test]
    fn invalid_crop_config_keeps_full_frame() {
        let crop = CropConfig {
            x: 0.9,
            y: 0.0,
            width: 0.5,
            height: 0.5,
        };
        let out = apply_crop_config(&test_image(400, 200), &crop);
        assert_eq!(out.dimensions(), (400, 200));
    }
}
