//! Retry queue inspection and operator actions.

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use ferry_core::models::{EntryId, QueueEntry, QueueStats, QueueStatus};
use ferry_delivery::{DrainReport, RetryOutcome, StatusLine};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{error::ApiError, AppState};

const MAX_LIST_LIMIT: i64 = 1000;

/// Query string of `GET /queue`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma-separated statuses; pending and failed when absent.
    pub status: Option<String>,
    /// Maximum entries returned.
    pub limit: Option<i64>,
}

impl ListQuery {
    fn statuses(&self) -> Result<Vec<QueueStatus>, ApiError> {
        let Some(raw) = self.status.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(vec![QueueStatus::Pending, QueueStatus::Failed]);
        };

        raw.split(',')
            .map(|s| {
                QueueStatus::from_str(s.trim()).map_err(|e| ApiError::BadRequest(e.to_string()))
            })
            .collect()
    }

    fn limit(&self) -> Result<i64, ApiError> {
        match self.limit {
            None => Ok(ferry_delivery::DEFAULT_LIST_LIMIT),
            Some(limit) if (1..=MAX_LIST_LIMIT).contains(&limit) => Ok(limit),
            Some(_) => {
                Err(ApiError::BadRequest(format!("limit must be between 1 and {MAX_LIST_LIMIT}")))
            },
        }
    }
}

/// Queue entry as shown to operators; the payload is summarized by size.
#[derive(Debug, Serialize)]
pub struct QueueEntryView {
    /// Entry id.
    pub id: EntryId,
    /// Trigger code of the queued event.
    pub trigger_code: String,
    /// Current status.
    pub status: QueueStatus,
    /// Attempts taken from the queue.
    pub attempts: i32,
    /// When the immediate attempt failed.
    pub created_at: DateTime<Utc>,
    /// Next eligible retry.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the receiver confirmed the entry.
    pub processed_at: Option<DateTime<Utc>>,
    /// Reason of the last failure.
    pub last_error: Option<String>,
    /// Size of the stored body in bytes.
    pub payload_size: usize,
}

impl From<QueueEntry> for QueueEntryView {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: entry.id,
            payload_size: entry.payload.len(),
            trigger_code: entry.trigger_code,
            status: entry.status,
            attempts: entry.attempts,
            created_at: entry.created_at,
            next_retry_at: entry.next_retry_at,
            processed_at: entry.processed_at,
            last_error: entry.last_error,
        }
    }
}

/// Dashboard widget payload.
#[derive(Debug, Serialize)]
pub struct WidgetResponse {
    /// Widget heading.
    pub title: String,
    /// Status lines.
    pub lines: Vec<StatusLine>,
}

/// `GET /queue/stats`
#[instrument(name = "queue_stats", skip(state))]
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.coordinator.stats().await?))
}

/// `GET /queue/widget`
#[instrument(name = "queue_widget", skip(state))]
pub async fn queue_widget(State(state): State<AppState>) -> Result<Json<WidgetResponse>, ApiError> {
    let lines = state.widget.lines().await?;
    Ok(Json(WidgetResponse { title: state.widget.title().to_string(), lines }))
}

/// `GET /queue?status=pending,failed&limit=100`
#[instrument(name = "list_queue", skip(state))]
pub async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<QueueEntryView>>, ApiError> {
    let statuses = query.statuses()?;
    let entries = state.coordinator.list_queue(&statuses, query.limit()?).await?;

    Ok(Json(entries.into_iter().map(QueueEntryView::from).collect()))
}

/// `POST /queue/drain`
#[instrument(name = "drain_queue", skip(state))]
pub async fn drain_queue(State(state): State<AppState>) -> Result<Json<DrainReport>, ApiError> {
    let target = state.targets.target().await;
    let report = state.coordinator.drain_due(&target).await?;

    info!(processed = report.processed, claimed = report.claimed, "operator drain completed");
    Ok(Json(report))
}

/// `POST /queue/{id}/retry`
///
/// 409 when another drain or retry holds the entry.
#[instrument(name = "retry_entry", skip(state))]
pub async fn retry_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = EntryId::from_str(&id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let target = state.targets.target().await;

    let outcome = state.coordinator.retry_one(id, &target).await?;
    let status = match outcome {
        RetryOutcome::Busy => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };

    info!(entry_id = %id, ?outcome, "operator retry completed");
    Ok((status, Json(outcome)).into_response())
}
