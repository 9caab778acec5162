//! Derivative key resolution for delivery.
//!
//! Pure function over a hydrated asset so the whole fallback ladder is
//! testable without a store: exact rendition, then same-category renditions,
//! then anything, then format preference, then modern-format priority.

use waypoint_core::models::{Derivative, ImageAsset, ProcessingStatus};
use waypoint_core::PipelineError;
use waypoint_processing::OutputFormat;
use waypoint_storage::keys;

/// Resolve the storage key and format to serve for `(asset, rendition)`.
pub fn resolve_derivative(
    asset: &ImageAsset,
    rendition: &str,
    preferred: Option<OutputFormat>,
) -> Result<(String, String), PipelineError> {
    if asset.status != ProcessingStatus::Ready {
        return Err(PipelineError::NotReady(format!(
            "asset {} is {}",
            asset.content_hash, asset.status
        )));
    }

    if rendition == "original" {
        return Ok((
            keys::original_key(&asset.content_hash),
            asset.original_format.clone(),
        ));
    }

    let mut candidates: Vec<&Derivative> = asset
        .derivatives
        .iter()
        .filter(|d| d.rendition_name == rendition)
        .collect();

    // The requested rendition may not exist (source too small to produce
    // it); fall back to siblings from the same category ladder.
    if candidates.is_empty() {
        if let Some((category, _)) = rendition.split_once('_') {
            candidates = asset
                .derivatives
                .iter()
                .filter(|d| d.rendition_name.starts_with(category))
                .collect();
        }
    }

    if candidates.is_empty() {
        candidates = asset.derivatives.iter().collect();
    }

    if candidates.is_empty() {
        return Err(PipelineError::NotFound(format!(
            "no derivatives for asset {}",
            asset.content_hash
        )));
    }

    if let Some(preferred) = preferred {
        if let Some(d) = candidates.iter().find(|d| d.format == preferred.as_str()) {
            return Ok((d.storage_key.clone(), d.format.clone()));
        }
    }

    for format in OutputFormat::PRIORITY {
        if let Some(d) = candidates.iter().find(|d| d.format == format.as_str()) {
            return Ok((d.storage_key.clone(), d.format.clone()));
        }
    }

    let first = candidates[0];
    Ok((first.storage_key.clone(), first.format.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    const HASH: &str = "cd0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd";

    fn derivative(asset_id: Uuid, rendition: &str, format: &str) -> Derivative {
        Derivative {
            id: Uuid::new_v4(),
            asset_id,
            rendition_name: rendition.to_string(),
            format: format.to_string(),
            width: 640,
            height: 360,
            size_bytes: 1000,
            storage_key: keys::derivative_key(HASH, 1, rendition, format),
        }
    }

    fn ready_asset(renditions: &[(&str, &str)]) -> ImageAsset {
        let id = Uuid::new_v4();
        ImageAsset {
            id,
            content_hash: HASH.to_string(),
            original_width: 2048,
            original_height: 1152,
            original_format: "jpeg".to_string(),
            original_size: 100_000,
            has_alpha: false,
            category: "cover".to_string(),
            status: ProcessingStatus::Ready,
            error_message: None,
            version: 1,
            derivatives: renditions
                .iter()
                .map(|(r, f)| derivative(id, r, f))
                .collect(),
            created_by_user_id: Uuid::new_v4(),
            created_at: Utc::now(),
            processed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn not_ready_asset_is_refused() {
        let mut asset = ready_asset(&[("cover_640", "webp")]);
        asset.status = ProcessingStatus::Processing;
        let err = resolve_derivative(&asset, "cover_640", None).unwrap_err();
        assert!(matches!(err, PipelineError::NotReady(_)));
    }

    #[test]
    fn original_passthrough() {
        let asset = ready_asset(&[("cover_640", "webp")]);
        let (key, format) = resolve_derivative(&asset, "original", None).unwrap();
        assert_eq!(key, keys::original_key(HASH));
        assert_eq!(format, "jpeg");
    }

    #[test]
    fn preferred_format_wins_when_present() {
        let asset = ready_asset(&[
            ("cover_640", "avif"),
            ("cover_640", "webp"),
            ("cover_640", "jpeg"),
        ]);
        let (key, format) =
            resolve_derivative(&asset, "cover_640", Some(OutputFormat::Webp)).unwrap();
        assert_eq!(format, "webp");
        assert!(key.ends_with("cover_640.webp"));
    }

    #[test]
    fn priority_is_avif_then_webp_then_jpeg() {
        let asset = ready_asset(&[
            ("cover_640", "jpeg"),
            ("cover_640", "webp"),
            ("cover_640", "avif"),
        ]);
        let (_, format) = resolve_derivative(&asset, "cover_640", None).unwrap();
        assert_eq!(format, "avif");

        let asset = ready_asset(&[("cover_640", "jpeg"), ("cover_640", "webp")]);
        let (_, format) = resolve_derivative(&asset, "cover_640", None).unwrap();
        assert_eq!(format, "webp");
    }

    #[test]
    fn missing_rendition_falls_back_to_category_siblings() {
        // cover_640 absent (source too small); cover_320 serves instead.
        let asset = ready_asset(&[("cover_320", "avif"), ("cover_320", "jpeg")]);
        let (key, format) = resolve_derivative(&asset, "cover_640", None).unwrap();
        assert_eq!(format, "avif");
        assert!(key.ends_with("cover_320.avif"));
    }

    #[test]
    fn unknown_rendition_falls_back_to_any_derivative() {
        let asset = ready_asset(&[("gallery_320", "webp")]);
        let (key, _) = resolve_derivative(&asset, "cover_640", None).unwrap();
        assert!(key.ends_with("gallery_320.webp"));
    }

    #[test]
    fn no_derivatives_is_not_found() {
        let asset = ready_asset(&[]);
        let err = resolve_derivative(&asset, "cover_640", None).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
