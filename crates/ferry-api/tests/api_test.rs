//! Router-level tests for the operator API.
//!
//! Requests go through the full middleware stack with `oneshot`, backed by
//! the in-memory queue store and a wiremock receiver.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use axum::{body::Body, Router};
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ferry_api::{create_router, AppState};
use ferry_core::{
    models::{EntryId, QueueEntry, QueueStatus},
    time::TestClock,
};
use ferry_delivery::{DeliveryClient, DeliveryCoordinator, InMemoryQueueStore, WebhookTarget};
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "op-secret";

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
}

struct TestApp {
    store: Arc<InMemoryQueueStore>,
    router: Router,
}

fn app(target: WebhookTarget) -> TestApp {
    let store = Arc::new(InMemoryQueueStore::new());
    let coordinator = Arc::new(
        DeliveryCoordinator::new(store.clone(), DeliveryClient::with_defaults().unwrap())
            .with_clock(Arc::new(TestClock::with_start_time(start_time()))),
    );
    let state = AppState::new(store.clone(), coordinator, Arc::new(target))
        .with_operator_token(Some(TOKEN.to_string()));

    TestApp { store, router: create_router(state, Duration::from_secs(30)) }
}

fn target_for(server: &MockServer) -> WebhookTarget {
    WebhookTarget::new(format!("{}/hook", server.uri()), "whsec_api", "org-7")
}

async fn receiver(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string("ok"))
        .mount(&server)
        .await;
    server
}

fn authed(method: &str, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, json)
}

fn queued_entry() -> QueueEntry {
    QueueEntry::pending(
        "PROPAL_VALIDATE",
        Bytes::from_static(br#"{"trigger_code":"PROPAL_VALIDATE","object":{"ref":"PR-3"}}"#),
        start_time() - ChronoDuration::hours(1),
        start_time() + ChronoDuration::minutes(15),
    )
}

#[tokio::test]
async fn liveness_is_public() {
    let app = app(WebhookTarget::default());

    let request = Request::get("/live").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
    assert_eq!(body["service"], "ferry");
}

#[tokio::test]
async fn health_is_degraded_without_target() {
    let app = app(WebhookTarget::default());

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["queue_store"]["status"], "up");
    assert_eq!(body["target_configured"], false);
}

#[tokio::test]
async fn health_is_healthy_with_target() {
    let server = receiver(200).await;
    let app = app(target_for(&server));

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["target_configured"], true);
}

#[tokio::test]
async fn operator_routes_require_token() {
    let app = app(WebhookTarget::default());

    let request = Request::get("/queue/stats").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let request = Request::get("/queue/stats")
        .header("authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        send(&app.router, authed("GET", "/queue/stats").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "pending": 0, "failed": 0 }));
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = app(WebhookTarget::default());

    let request = Request::get("/live").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn unsubscribed_event_is_ignored() {
    let server = receiver(200).await;
    let app = app(target_for(&server));

    let request = authed("POST", "/events")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"trigger_code":"ORDER_CLOSE","object":{"ref":"CO-1"}}"#))
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], "ignored");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn delivered_event_returns_ok() {
    let server = receiver(200).await;
    let app = app(target_for(&server));

    let request = authed("POST", "/events")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"trigger_code":"BILL_VALIDATE","object":{"ref":"FA-9"}}"#))
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], "dispatched");
    assert_eq!(body["outcome"], "delivered");
    assert!(app.store.entries().await.is_empty());
}

#[tokio::test]
async fn failed_event_is_queued_and_listed() {
    let server = receiver(503).await;
    let app = app(target_for(&server));

    let request = authed("POST", "/events")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"trigger_code":"BILL_VALIDATE","object":{"ref":"FA-10"}}"#))
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "queued");

    let (_, stats) =
        send(&app.router, authed("GET", "/queue/stats").body(Body::empty()).unwrap()).await;
    assert_eq!(stats, json!({ "pending": 1, "failed": 0 }));

    let (status, listed) =
        send(&app.router, authed("GET", "/queue").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["trigger_code"], "BILL_VALIDATE");
    assert_eq!(listed[0]["status"], "pending");
    assert_eq!(listed[0]["attempts"], 0);
    assert!(listed[0]["payload_size"].as_u64().unwrap() > 0);
    assert!(listed[0].get("payload").is_none());

    let (_, widget) =
        send(&app.router, authed("GET", "/queue/widget").body(Body::empty()).unwrap()).await;
    assert_eq!(widget["title"], "Webhook delivery");
    assert_eq!(widget["lines"][0]["severity"], "warning");
}

#[tokio::test]
async fn list_rejects_unknown_status() {
    let app = app(WebhookTarget::default());

    let request = authed("GET", "/queue?status=archived").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn retry_validates_the_entry_id() {
    let server = receiver(200).await;
    let app = app(target_for(&server));

    let request = authed("POST", "/queue/not-a-uuid/retry").body(Body::empty()).unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/queue/{}/retry", EntryId::new());
    let (status, body) = send(&app.router, authed("POST", &uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn retry_delivers_a_queued_entry() {
    let server = receiver(200).await;
    let app = app(target_for(&server));
    let entry = queued_entry();
    app.store.insert(entry.clone()).await;

    let uri = format!("/queue/{}/retry", entry.id);
    let (status, body) = send(&app.router, authed("POST", &uri).body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "delivered");

    let stored = app.store.entries().await;
    assert_eq!(stored[0].status, QueueStatus::Processed);
    assert_eq!(stored[0].attempts, 1);
}

#[tokio::test]
async fn retry_of_claimed_entry_conflicts() {
    let server = receiver(200).await;
    let app = app(target_for(&server));
    let mut entry = queued_entry();
    entry.status = QueueStatus::InFlight;
    entry.claimed_at = Some(start_time());
    app.store.insert(entry.clone()).await;

    let uri = format!("/queue/{}/retry", entry.id);
    let (status, body) = send(&app.router, authed("POST", &uri).body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["outcome"], "busy");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn drain_reports_counts() {
    let server = receiver(200).await;
    let app = app(target_for(&server));
    let mut due = queued_entry();
    due.next_retry_at = Some(start_time() - ChronoDuration::minutes(1));
    app.store.insert(due).await;
    app.store.insert(queued_entry()).await;

    let (status, report) =
        send(&app.router, authed("POST", "/queue/drain").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["claimed"], 1);
    assert_eq!(report["processed"], 1);

    let (_, stats) =
        send(&app.router, authed("GET", "/queue/stats").body(Body::empty()).unwrap()).await;
    assert_eq!(stats, json!({ "pending": 1, "failed": 0 }));
}
