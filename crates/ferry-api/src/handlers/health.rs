//! Health check handlers for service monitoring.

use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Whether a webhook target is configured
    pub target_configured: bool,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Running, but deliveries are skipped
    Degraded,
    /// Queue store unreachable
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Queue store reachability
    pub queue_store: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Optional error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Reports queue store reachability and target configuration.
///
/// Unhealthy (503) when the queue store cannot be read, degraded when no
/// target is configured.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let store_stats = state.coordinator.stats().await;
    let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let queue_store = match store_stats {
        Ok(_) => ComponentHealth { status: ComponentStatus::Up, message: None, response_time_ms },
        Err(e) => ComponentHealth {
            status: ComponentStatus::Down,
            message: Some(e.to_string()),
            response_time_ms,
        },
    };
    let target_configured = state.targets.target().await.is_configured();

    let status = match (&queue_store.status, target_configured) {
        (ComponentStatus::Down, _) => HealthStatus::Unhealthy,
        (ComponentStatus::Up, false) => HealthStatus::Degraded,
        (ComponentStatus::Up, true) => HealthStatus::Healthy,
    };
    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(?status, "health check completed");

    let response = HealthResponse {
        status,
        timestamp: state.coordinator.clock().now_utc(),
        checks: HealthChecks { queue_store },
        target_configured,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response)).into_response()
}

/// Liveness check; touches no dependency.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.coordinator.clock().now_utc(),
        "service": "ferry"
    });

    (StatusCode::OK, Json(response)).into_response()
}
