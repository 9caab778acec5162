//! Image delivery: redirect to the public derivative URL, or proxy the
//! bytes for originals and explicit `?proxy=true` requests.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use waypoint_core::PipelineError;
use waypoint_processing::OutputFormat;
use waypoint_storage::keys;

use crate::error::HttpPipelineError;
use crate::state::AppState;

/// Derivatives are content-addressed and versioned, so they never change.
const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Deserialize)]
pub struct ServeImageQuery {
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Serve one rendition of an asset. Honors `Accept: image/avif` and
/// `Accept: image/webp` when choosing among the stored formats.
#[utoipa::path(
    get,
    path = "/img/{hash}/{rendition}",
    tag = "images",
    params(
        ("hash" = String, Path, description = "Content hash of the asset"),
        ("rendition" = String, Path, description = "Rendition name, or \"original\""),
        ("proxy" = Option<String>, Query, description = "Set to \"true\" to proxy the bytes instead of redirecting")
    ),
    responses(
        (status = 302, description = "Redirect to the public derivative URL"),
        (status = 200, description = "Proxied image bytes"),
        (status = 404, description = "Asset missing or not ready")
    )
)]
#[tracing::instrument(skip(state, headers, query))]
pub async fn serve_image(
    State(state): State<Arc<AppState>>,
    Path((hash, rendition)): Path<(String, String)>,
    Query(query): Query<ServeImageQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpPipelineError> {
    let preferred = if rendition == "original" {
        None
    } else {
        preferred_format(&headers)
    };

    let (key, format) = state
        .engine
        .get_derivative_key(&hash, &rendition, preferred)
        .await?;

    // Originals are proxied unconditionally so browser-side crop tooling is
    // not blocked by cross-origin rules on the blob store.
    let proxy = rendition == "original" || query.proxy.as_deref() == Some("true");

    if proxy {
        let (stream, content_length) = state.store.get_stream(&key).await?;

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, keys::content_type_for_format(&format))
            .header(header::CONTENT_LENGTH, content_length)
            .header(header::CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE);
        if rendition != "original" {
            builder = builder.header(header::VARY, "Accept");
        }

        return builder
            .body(Body::from_stream(stream))
            .map_err(|e| PipelineError::Permanent(format!("building response: {e}")).into());
    }

    let public_url = state.store.public_url(&key);
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, public_url)
        .header(header::CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE)
        .header(header::VARY, "Accept")
        .body(Body::empty())
        .map_err(|e| PipelineError::Permanent(format!("building response: {e}")).into())
}

fn preferred_format(headers: &HeaderMap) -> Option<OutputFormat> {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if accept.contains("image/avif") {
        Some(OutputFormat::Avif)
    } else if accept.contains("image/webp") {
        Some(OutputFormat::Webp)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn accept_header_selects_modern_formats() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("image/avif,image/webp,image/*;q=0.8"),
        );
        assert_eq!(preferred_format(&headers), Some(OutputFormat::Avif));

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("image/webp,image/*;q=0.8"),
        );
        assert_eq!(preferred_format(&headers), Some(OutputFormat::Webp));

        headers.insert(header::ACCEPT, HeaderValue::from_static("image/*"));
        assert_eq!(preferred_format(&headers), None);
    }

    #[test]
    fn cache_header_is_exactly_immutable_one_year() {
        assert_eq!(CACHE_CONTROL_IMMUTABLE, "public, max-age=31536000, immutable");
    }
}
