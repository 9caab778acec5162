//! Route configuration.

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api_doc::ApiDoc;
use crate::handlers;
use crate::state::AppState;

/// JSON request bodies are small control messages; image bytes go straight
/// to the blob store via presigned URLs.
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/uploads/presign", post(handlers::uploads::presign_upload))
        .route("/api/v1/uploads/finalize", post(handlers::uploads::finalize_upload))
        .route("/api/v1/uploads", delete(handlers::uploads::delete_upload))
        .route("/api/v1/assets/{id}", get(handlers::assets::get_asset_status))
        .route(
            "/api/v1/assets/{id}/reprocess",
            post(handlers::assets::reprocess_asset),
        )
        .route("/img/{hash}/{rendition}", get(handlers::images::serve_image))
        .route("/api/docs/openapi.json", get(openapi_json))
        .route("/healthz", get(healthz))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
