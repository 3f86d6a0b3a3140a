//! JSON error responses for the operator API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ferry_delivery::DeliveryError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Standard error response format.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or wrong operator token.
    #[error("missing or invalid operator token")]
    Unauthorized,

    /// Malformed path, query or body.
    #[error("{0}")]
    BadRequest(String),

    /// Error from the delivery engine.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl ApiError {
    /// Status code and stable error code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Delivery(e) => match e {
                DeliveryError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                DeliveryError::InvalidEvent { .. } => (StatusCode::BAD_REQUEST, "invalid_event"),
                DeliveryError::PersistenceError { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "persistence_failure")
                },
                DeliveryError::ShutdownRequested => {
                    (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
                },
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(code, error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail { code: code.to_string(), message: self.to_string() },
        };

        (status, Json(body)).into_response()
    }
}
