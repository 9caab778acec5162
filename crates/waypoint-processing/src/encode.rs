//! Format encoders.
//!
//! Every encoder works from decoded pixels, so EXIF and non-sRGB color
//! profiles never survive into a derivative.

use anyhow::Result;
use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;

use crate::rendition::{OutputFormat, QualitySettings};

/// Encode one image into one output format with the preset's quality.
pub fn encode(img: &DynamicImage, format: OutputFormat, quality: QualitySettings) -> Result<Bytes> {
    match format {
        OutputFormat::Jpeg => encode_jpeg(img, quality.jpeg),
        OutputFormat::Webp => encode_webp(img, quality.webp),
        OutputFormat::Avif => encode_avif(img, quality.avif_encoder_quality()),
        OutputFormat::Png => encode_png(img),
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Bytes> {
    let rgb_img = img.to_rgb8();
    let (width, height) = rgb_img.dimensions();

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality as f32);
    comp.set_progressive_mode();
    comp.set_optimize_coding(true);

    let mut comp = comp.start_compress(Vec::new())?;
    comp.write_scanlines(&rgb_img)?;
    let jpeg_data = comp.finish()?;

    Ok(Bytes::from(jpeg_data))
}

fn encode_webp(img: &DynamicImage, quality: f32) -> Result<Bytes> {
    let (width, height) = img.dimensions();
    let rgba_img = img.to_rgba8();

    let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
    let webp_data = encoder.encode(quality);

    Ok(Bytes::copy_from_slice(&webp_data))
}

fn encode_avif(img: &DynamicImage, quality: f32) -> Result<Bytes> {
    let (width, height) = img.dimensions();
    let encoder = ravif::Encoder::new().with_quality(quality).with_speed(6);

    let encoded = if img.color().has_alpha() {
        let rgba_img = img.to_rgba8();
        let pixels: Vec<rgb::RGBA8> = rgba_img
            .as_raw()
            .chunks_exact(4)
            .map(|px| rgb::RGBA8::new(px[0], px[1], px[2], px[3]))
            .collect();
        let buf = ravif::Img::new(pixels.as_slice(), width as usize, height as usize);
        encoder.encode_rgba(buf)?
    } else {
        let rgb_img = img.to_rgb8();
        let pixels: Vec<rgb::RGB8> = rgb_img
            .as_raw()
            .chunks_exact(3)
            .map(|px| rgb::RGB8::new(px[0], px[1], px[2]))
            .collect();
        let buf = ravif::Img::new(pixels.as_slice(), width as usize, height as usize);
        encoder.encode_rgb(buf)?
    };

    Ok(Bytes::copy_from_slice(&encoded.avif_file))
}

fn encode_png(img: &DynamicImage) -> Result<Bytes> {
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut buffer),
        CompressionType::Best,
        PngFilterType::Adaptive,
    );
    img.write_with_encoder(encoder)?;

    Ok(Bytes::from(buffer))
}
