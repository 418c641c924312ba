//! API error type with structured responses.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::LeaseError;

/// Seconds a caller is asked to wait when the pool is exhausted.
const RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No sessions available")]
    NoSessionsAvailable,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InvalidArchive(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    /// Detail is logged, never sent to the caller.
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoSessionsAvailable => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidArchive(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoSessionsAvailable => "NO_SESSIONS_AVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidArchive(_) => "INVALID_ARCHIVE",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match &self {
            ApiError::Internal(detail) => {
                error!(error_code = code, detail = %detail, "API error");
            }
            other => {
                debug!(error_code = code, message = %other, "Client error");
            }
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::NoSessionsAvailable) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

impl From<LeaseError> for ApiError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Exhausted => ApiError::NoSessionsAvailable,
            LeaseError::NotFound(_) | LeaseError::DirectoryMissing(_) => {
                ApiError::NotFound(err.to_string())
            }
            LeaseError::NotLocked(_)
            | LeaseError::InvalidSessionId(_)
            | LeaseError::AlreadyExists(_)
            | LeaseError::InvalidSource(_) => ApiError::BadRequest(err.to_string()),
            LeaseError::InvalidArchive(_) => ApiError::InvalidArchive(err.to_string()),
            LeaseError::TooLarge { .. } | LeaseError::TooManyEntries { .. } => {
                ApiError::PayloadTooLarge(err.to_string())
            }
            LeaseError::Io(_) | LeaseError::StateCorruption { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(format!("Malformed upload: {}", err.body_text()))
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionId;

    fn id() -> SessionId {
        SessionId::parse("3").unwrap()
    }

    #[test]
    fn test_lease_error_status_mapping() {
        let cases = [
            (LeaseError::Exhausted, StatusCode::TOO_MANY_REQUESTS),
            (LeaseError::NotFound(id()), StatusCode::NOT_FOUND),
            (LeaseError::DirectoryMissing(id()), StatusCode::NOT_FOUND),
            (LeaseError::NotLocked(id()), StatusCode::BAD_REQUEST),
            (
                LeaseError::InvalidSessionId("../x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                LeaseError::InvalidArchive("bad".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LeaseError::TooLarge { size: 2, limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                LeaseError::Io(std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_internal_message_is_generic() {
        let err = ApiError::from(LeaseError::Io(std::io::Error::other("/secret/path")));
        assert_eq!(err.to_string(), "Internal server error");
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_exhausted_code() {
        let err = ApiError::from(LeaseError::Exhausted);
        assert_eq!(err.error_code(), "NO_SESSIONS_AVAILABLE");
        assert_eq!(err.to_string(), "No sessions available");
    }

    #[test]
    fn test_only_exhausted_sets_retry_after() {
        let response = ApiError::from(LeaseError::Exhausted).into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");

        let response = ApiError::from(LeaseError::NotLocked(id())).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
