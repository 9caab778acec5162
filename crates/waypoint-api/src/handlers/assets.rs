//! Asset status and reprocessing handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use waypoint_core::models::{CropConfig, ImageAsset, ProcessingJob, ProcessingStatus};
use waypoint_core::PipelineError;
use waypoint_storage::keys;

use crate::auth::AuthUser;
use crate::error::HttpPipelineError;
use crate::handlers::uploads::EnqueueResponse;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct OriginalInfo {
    pub width: i32,
    pub height: i32,
    pub format: String,
    pub size_bytes: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DerivativeInfo {
    pub width: i32,
    pub height: i32,
    pub formats: Vec<String>,
    pub url_pattern: String,
}

/// Snapshot of an asset, or of the job when the asset does not exist yet.
#[derive(Debug, Serialize, ToSchema)]
pub struct AssetStatusResponse {
    pub asset_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<OriginalInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivatives: Option<BTreeMap<String, DerivativeInfo>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssetStatusResponse {
    fn from_asset(asset: ImageAsset) -> Self {
        let mut response = AssetStatusResponse {
            asset_id: asset.id,
            content_hash: Some(asset.content_hash.clone()),
            status: asset.status.to_string(),
            original: None,
            derivatives: None,
            created_at: asset.created_at,
            processed_at: asset.processed_at,
            error: asset.error_message.clone(),
        };

        if asset.status == ProcessingStatus::Ready {
            response.original = Some(OriginalInfo {
                width: asset.original_width,
                height: asset.original_height,
                format: asset.original_format.clone(),
                size_bytes: asset.original_size,
            });

            let mut grouped: BTreeMap<String, DerivativeInfo> = BTreeMap::new();
            for d in &asset.derivatives {
                grouped
                    .entry(d.rendition_name.clone())
                    .and_modify(|info| info.formats.push(d.format.clone()))
                    .or_insert_with(|| DerivativeInfo {
                        width: d.width,
                        height: d.height,
                        formats: vec![d.format.clone()],
                        url_pattern: format!(
                            "/img/{}/{}",
                            asset.content_hash, d.rendition_name
                        ),
                    });
            }
            response.derivatives = Some(grouped);
        }

        response
    }

    fn from_job(job: ProcessingJob) -> Self {
        AssetStatusResponse {
            asset_id: job.id,
            content_hash: None,
            status: job.status.to_string(),
            original: None,
            derivatives: None,
            created_at: job.created_at,
            processed_at: None,
            error: job.last_error,
        }
    }
}

/// Current snapshot of an asset by asset id or job id. While the asset row
/// does not exist yet, the job's view is returned under the same shape.
#[utoipa::path(
    get,
    path = "/api/v1/assets/{id}",
    tag = "assets",
    params(("id" = Uuid, Path, description = "Asset id or job id")),
    responses(
        (status = 200, description = "Asset or job snapshot", body = AssetStatusResponse),
        (status = 404, description = "Neither an asset nor a job with this id")
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_asset_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpPipelineError> {
    if let Some(asset) = state.engine.get_asset_by_id(id).await? {
        return Ok(Json(AssetStatusResponse::from_asset(asset)));
    }

    let Some(job) = state.engine.get_job_by_id(id).await? else {
        return Err(PipelineError::NotFound(format!("asset {id}")).into());
    };

    // A finished job points at its asset; prefer the richer view.
    if let Some(asset_id) = job.asset_id {
        if let Some(asset) = state.engine.get_asset_by_id(asset_id).await? {
            return Ok(Json(AssetStatusResponse::from_asset(asset)));
        }
    }

    Ok(Json(AssetStatusResponse::from_job(job)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReprocessRequest {
    pub crop_data: CropConfig,
}

/// Reprocess an existing asset from its canonical original with new crop
/// data. Bumps the asset version.
#[utoipa::path(
    post,
    path = "/api/v1/assets/{id}/reprocess",
    tag = "assets",
    params(("id" = String, Path, description = "Content hash of the asset")),
    request_body = ReprocessRequest,
    responses(
        (status = 202, description = "Reprocessing queued", body = EnqueueResponse),
        (status = 403, description = "Caller does not own this asset"),
        (status = 404, description = "Unknown asset")
    )
)]
#[tracing::instrument(skip(state, request), fields(user_id = %user.user_id))]
pub async fn reprocess_asset(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
    Json(request): Json<ReprocessRequest>,
) -> Result<impl IntoResponse, HttpPipelineError> {
    let asset = state
        .engine
        .get_asset_by_hash(&hash)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("asset {hash}")))?;

    if asset.created_by_user_id != user.user_id {
        return Err(PipelineError::Unauthorized(
            "not authorized to reprocess this asset".to_string(),
        )
        .into());
    }

    let original_key = keys::original_key(&asset.content_hash);
    let job_id = state
        .engine
        .queue_reprocessing(
            &original_key,
            &asset.category,
            user.user_id,
            Some(request.crop_data),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::for_job(job_id))))
}
