//! Error types module
//!
//! All pipeline errors are unified under [`PipelineError`]. The variants mirror
//! the failure classes the engine and HTTP layer care about: whether an error
//! is worth retrying, and which status code it maps to at the edge.

use sqlx::Error as SqlxError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Bad input bytes (oversize, unknown format, decode failure). Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Network blip, 5xx from the blob store, timeout. Retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Malformed state, missing row, panic inside a worker. Never retried.
    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Asset exists but has not reached `ready`.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Unique violation, e.g. two concurrent jobs producing the same hash.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No caller identity at all (missing or unparseable credentials).
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated caller acting on a resource it does not own.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl PipelineError {
    /// Whether the engine should retry the job after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }

    /// Machine-readable code for error responses and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_FAILED",
            PipelineError::Transient(_) => "TRANSIENT",
            PipelineError::Permanent(_) => "PERMANENT",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::NotReady(_) => "NOT_READY",
            PipelineError::Conflict(_) => "CONFLICT",
            PipelineError::Unauthenticated(_) => "UNAUTHENTICATED",
            PipelineError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }

    /// HTTP status the API layer responds with.
    pub fn http_status_code(&self) -> u16 {
        match self {
            PipelineError::Validation(_) => 400,
            PipelineError::Transient(_) => 503,
            PipelineError::Permanent(_) => 500,
            PipelineError::NotFound(_) => 404,
            PipelineError::NotReady(_) => 404,
            PipelineError::Conflict(_) => 409,
            PipelineError::Unauthenticated(_) => 401,
            PipelineError::Unauthorized(_) => 403,
        }
    }
}

impl From<SqlxError> for PipelineError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => PipelineError::NotFound("row not found".to_string()),
            SqlxError::Database(db) if db.is_unique_violation() => {
                PipelineError::Conflict(db.to_string())
            }
            SqlxError::Io(_) | SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
                PipelineError::Transient(err.to_string())
            }
            _ => PipelineError::Permanent(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Permanent(format!("{err:#}"))
    }
}
