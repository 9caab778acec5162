//! Caller identity extractor.
//!
//! Authentication itself is handled upstream; the gateway forwards the
//! verified user id in `x-user-id`. Requests without it are rejected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;
use waypoint_core::PipelineError;

use crate::error::HttpPipelineError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, as asserted by the upstream auth layer.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = HttpPipelineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                HttpPipelineError(PipelineError::Unauthenticated(
                    "missing or invalid user identity".to_string(),
                ))
            })?;

        Ok(AuthUser { user_id })
    }
}
