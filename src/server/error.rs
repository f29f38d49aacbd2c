//! Errors returned before the event stream starts, as `{error}` JSON.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::types::{RunError, ValidationError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Internal(msg) => error!(message = %msg, "Request failed"),
            ApiError::BadRequest(msg) => debug!(message = %msg, "Rejected request"),
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Validation(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let bad: ApiError = ValidationError::EpochsNotArray.into();
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let io = RunError::Io {
            path: "test/powa-config.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let api: ApiError = io.into();
        assert!(matches!(api, ApiError::Internal(_)));
        assert_eq!(api.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let wrapped: ApiError = RunError::from(ValidationError::MissingEpochs).into();
        assert!(matches!(wrapped, ApiError::BadRequest(_)));
    }
}
