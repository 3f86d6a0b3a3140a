//! Event submission by producers.
//!
//! `POST /events` accepts `{"trigger_code": "...", "object": {...}}` and runs
//! it through the host event handler: unsubscribed triggers are ignored, the
//! rest get one immediate delivery attempt and are queued on failure.

use axum::{extract::State, http::StatusCode, Json};
use ferry_core::models::OutboundEvent;
use ferry_delivery::{DispatchOutcome, HandlerOutcome, HostEvent};
use tracing::{info, instrument};

use crate::{error::ApiError, AppState};

/// `POST /events`
///
/// 202 when the event was queued for retry, 200 otherwise.
#[instrument(
    name = "submit_event",
    skip(state, event),
    fields(trigger_code = %event.trigger_code)
)]
pub async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<OutboundEvent>,
) -> Result<(StatusCode, Json<HandlerOutcome>), ApiError> {
    let host_event = HostEvent { action: event.trigger_code, object: event.payload };
    let outcome = state.events.handle(host_event).await?;

    let status = match &outcome {
        HandlerOutcome::Dispatched(DispatchOutcome::Queued { entry_id, .. }) => {
            info!(entry_id = %entry_id, "event queued for retry");
            StatusCode::ACCEPTED
        },
        _ => StatusCode::OK,
    };

    Ok((status, Json(outcome)))
}
