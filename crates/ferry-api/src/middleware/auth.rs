//! Operator bearer-token authentication.
//!
//! Queue and event routes require `Authorization: Bearer <operator_token>`
//! when a token is configured.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{error::ApiError, AppState};

/// Extracts the bearer token from the Authorization header.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Compares without short-circuiting on the first differing byte.
fn tokens_match(expected: &str, provided: &str) -> bool {
    let (expected, provided) = (expected.as_bytes(), provided.as_bytes());
    expected.len() == provided.len()
        && expected.iter().zip(provided).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Axum middleware that rejects requests without the operator token.
pub async fn operator_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.operator_token.as_deref() {
        match extract_bearer(req.headers()) {
            Some(provided) if tokens_match(expected, provided) => {},
            _ => {
                warn!(path = %req.uri().path(), "rejected request without valid operator token");
                return Err(ApiError::Unauthorized);
            },
        }
    }

    Ok(next.run(req).await)
}
