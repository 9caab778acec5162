//! HTTP error response conversion.
//!
//! Handlers return `Result<impl IntoResponse, HttpPipelineError>`; domain
//! errors become a consistent JSON body with the status code the taxonomy
//! prescribes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use waypoint_core::PipelineError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error code for programmatic handling.
    pub code: String,
    /// Whether retrying the request may succeed.
    pub recoverable: bool,
}

/// Wrapper so the external `IntoResponse` trait can be implemented for the
/// core error type.
#[derive(Debug)]
pub struct HttpPipelineError(pub PipelineError);

impl From<PipelineError> for HttpPipelineError {
    fn from(err: PipelineError) -> Self {
        HttpPipelineError(err)
    }
}

impl From<anyhow::Error> for HttpPipelineError {
    fn from(err: anyhow::Error) -> Self {
        HttpPipelineError(PipelineError::Permanent(format!("{err:#}")))
    }
}

impl From<waypoint_storage::StorageError> for HttpPipelineError {
    fn from(err: waypoint_storage::StorageError) -> Self {
        HttpPipelineError(err.into())
    }
}

impl IntoResponse for HttpPipelineError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %err, code = err.error_code(), "request failed");
        } else {
            tracing::debug!(error = %err, code = err.error_code(), "request rejected");
        }

        let body = ErrorResponse {
            // Internal details stay out of 5xx bodies.
            error: if status.is_server_error() {
                "internal server error".to_string()
            } else {
                err.to_string()
            },
            code: err.error_code().to_string(),
            recoverable: err.is_retryable(),
        };

        (status, Json(body)).into_response()
    }
}
