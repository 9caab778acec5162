//! OpenAPI document for the pipeline surface.

use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers::assets::{AssetStatusResponse, DerivativeInfo, OriginalInfo, ReprocessRequest};
use crate::handlers::uploads::{EnqueueResponse, FinalizeRequest, PresignRequest, PresignResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "waypoint image pipeline",
        description = "Upload ingestion, derivative generation, and delivery"
    ),
    paths(
        crate::handlers::uploads::presign_upload,
        crate::handlers::uploads::finalize_upload,
        crate::handlers::uploads::delete_upload,
        crate::handlers::assets::get_asset_status,
        crate::handlers::assets::reprocess_asset,
        crate::handlers::images::serve_image,
    ),
    components(schemas(
        PresignRequest,
        PresignResponse,
        FinalizeRequest,
        EnqueueResponse,
        ReprocessRequest,
        AssetStatusResponse,
        OriginalInfo,
        DerivativeInfo,
        ErrorResponse,
    ))
)]
pub struct ApiDoc;
