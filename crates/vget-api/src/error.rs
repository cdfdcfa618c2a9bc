//! API error types.
//!
//! Every error response carries a machine-readable `kind` from the stable
//! vocabulary in `vget-models`, so clients can branch without parsing
//! messages.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vget_jobs::{CancelError, SubmitError};
use vget_models::ErrorKind;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The job exists but its result is not available yet.
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Tier restricted: {0}")]
    TierRestricted(String),

    #[error("Rate limited")]
    RateLimited { retry_after: Duration },

    #[error("Range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TierRestricted(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized(_) => ErrorKind::Validation,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::NotReady(_) => ErrorKind::NotReady,
            ApiError::BadRequest(_) | ApiError::RangeNotSatisfiable { .. } => ErrorKind::Validation,
            ApiError::Conflict(_) => ErrorKind::Validation,
            ApiError::TierRestricted(_) => ErrorKind::TierRestricted,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Validation(msg) => ApiError::BadRequest(msg),
            SubmitError::RateLimited { retry_after } => ApiError::RateLimited { retry_after },
            SubmitError::TierRestricted(msg) => ApiError::TierRestricted(msg),
            SubmitError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<CancelError> for ApiError {
    fn from(e: CancelError) -> Self {
        match e {
            CancelError::NotFound => ApiError::NotFound("Job not found".to_string()),
            CancelError::AlreadyTerminal => {
                ApiError::Conflict("Job already finished".to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind().as_str();

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse { detail, kind });

        match self {
            ApiError::RateLimited { retry_after } => {
                // Ceil so "Retry-After: 0" can never invite an instant retry.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                (status, [("Retry-After", secs.max(1).to_string())], body).into_response()
            }
            ApiError::RangeNotSatisfiable { size } => {
                (status, [("Content-Range", format!("bytes */{size}"))], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}
