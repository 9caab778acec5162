//! Upload handlers: presign, finalize, delete.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;
use waypoint_core::models::CropConfig;
use waypoint_core::PipelineError;
use waypoint_processing::validator::category_limits;
use waypoint_storage::keys;

use crate::auth::AuthUser;
use crate::error::HttpPipelineError;
use crate::state::AppState;

const UPLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);
/// Rough time-to-ready hint returned with 202 responses.
const ESTIMATED_COMPLETION_SECONDS: u32 = 5;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PresignRequest {
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresignResponse {
    pub upload_id: Uuid,
    pub upload_url: String,
    pub key: String,
    pub max_size_bytes: u64,
    pub upload_expires_at: DateTime<Utc>,
    pub allowed_content_types: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FinalizeRequest {
    pub upload_key: String,
    #[serde(default)]
    pub category: String,
    pub crop_data: Option<CropConfig>,
}

/// 202 body for finalize and reprocess: poll `status_url` for progress.
#[derive(Debug, Serialize, ToSchema)]
pub struct EnqueueResponse {
    pub asset_id: Uuid,
    pub status: String,
    pub status_url: String,
    pub estimated_completion_seconds: u32,
}

impl EnqueueResponse {
    pub fn for_job(job_id: Uuid) -> Self {
        Self {
            asset_id: job_id,
            status: "pending".to_string(),
            status_url: format!("/api/v1/assets/{job_id}"),
            estimated_completion_seconds: ESTIMATED_COMPLETION_SECONDS,
        }
    }
}

/// Generate a presigned URL for a direct upload into the caller's staging
/// prefix. The signature pins the content type, a size cap, and a
/// 15-minute expiry.
#[utoipa::path(
    post,
    path = "/api/v1/uploads/presign",
    tag = "uploads",
    request_body = PresignRequest,
    responses(
        (status = 200, description = "Presigned URL generated", body = PresignResponse),
        (status = 400, description = "Unsupported content type"),
        (status = 401, description = "Missing caller identity")
    )
)]
#[tracing::instrument(skip(state, request), fields(user_id = %user.user_id, content_type = %request.content_type))]
pub async fn presign_upload(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(request): Json<PresignRequest>,
) -> Result<impl IntoResponse, HttpPipelineError> {
    if !keys::ACCEPTED_CONTENT_TYPES.contains(&request.content_type.as_str()) {
        return Err(PipelineError::Validation(format!(
            "content type {} is not supported",
            request.content_type
        ))
        .into());
    }

    let category = if request.category.is_empty() {
        "general".to_string()
    } else {
        request.category.clone()
    };

    let ext = request
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| keys::extension_for_content_type(&request.content_type).to_string());

    let upload_id = Uuid::new_v4();
    let key = keys::staging_key(
        user.user_id,
        &category,
        Utc::now().timestamp(),
        upload_id,
        &ext,
    );

    let limits = category_limits(&category);
    let presigned = state
        .store
        .presign_put(&key, &request.content_type, limits.max_bytes as i64, UPLOAD_URL_TTL)
        .await?;

    tracing::info!(upload_id = %upload_id, key = %key, "presigned upload URL issued");

    Ok(Json(PresignResponse {
        upload_id,
        upload_url: presigned.url,
        key,
        max_size_bytes: limits.max_bytes,
        upload_expires_at: presigned.expires_at,
        allowed_content_types: keys::ACCEPTED_CONTENT_TYPES
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }))
}

/// Queue a staged upload for processing. Returns 202; the caller polls the
/// status URL.
#[utoipa::path(
    post,
    path = "/api/v1/uploads/finalize",
    tag = "uploads",
    request_body = FinalizeRequest,
    responses(
        (status = 202, description = "Processing queued", body = EnqueueResponse),
        (status = 403, description = "Upload key belongs to another user")
    )
)]
#[tracing::instrument(skip(state, request), fields(user_id = %user.user_id, upload_key = %request.upload_key))]
pub async fn finalize_upload(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(request): Json<FinalizeRequest>,
) -> Result<impl IntoResponse, HttpPipelineError> {
    let category = if request.category.is_empty() {
        "general".to_string()
    } else {
        request.category
    };

    let job_id = state
        .engine
        .queue_processing(&request.upload_key, &category, user.user_id, request.crop_data)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::for_job(job_id))))
}

#[derive(Debug, Deserialize)]
pub struct DeleteUploadQuery {
    pub key: String,
}

/// Delete an uploaded object. Only keys under the caller's own prefixes are
/// allowed.
#[utoipa::path(
    delete,
    path = "/api/v1/uploads",
    tag = "uploads",
    params(("key" = String, Query, description = "Storage key to delete")),
    responses(
        (status = 200, description = "Object deleted"),
        (status = 403, description = "Key belongs to another user")
    )
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id, key = %query.key))]
pub async fn delete_upload(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteUploadQuery>,
) -> Result<impl IntoResponse, HttpPipelineError> {
    let allowed = query.key.starts_with(&keys::staging_prefix(user.user_id))
        || query.key.starts_with(&keys::permanent_prefix(user.user_id));
    if !allowed {
        return Err(
            PipelineError::Unauthorized("not authorized to delete this object".to_string()).into(),
        );
    }

    state.store.delete(&query.key).await?;

    Ok(Json(serde_json::json!({ "message": "object deleted" })))
}
