//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Operator authentication (queue and event routes only)
//! 5. Handler execution
//!
//! The server stops accepting connections when its cancellation token fires
//! and waits for in-flight requests before returning.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, middleware::auth::operator_auth, AppState};

/// Creates the router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use ferry_api::{create_router, AppState};
///
/// fn build(state: AppState) -> axum::Router {
///     create_router(state, Duration::from_secs(30))
/// }
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check));

    let operator_routes = Router::new()
        .route("/queue", get(handlers::list_queue))
        .route("/queue/stats", get(handlers::queue_stats))
        .route("/queue/widget", get(handlers::queue_widget))
        .route("/queue/drain", post(handlers::drain_queue))
        .route("/queue/{id}/retry", post(handlers::retry_entry))
        .route("/events", post(handlers::submit_event))
        .layer(middleware::from_fn_with_state(state.clone(), operator_auth));

    Router::new()
        .merge(health_routes)
        .merge(operator_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Adds an `X-Request-Id` header to every response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves the router on `addr` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or the server
/// fails while running.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "operator API listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    info!("operator API stopped");
    Ok(())
}
