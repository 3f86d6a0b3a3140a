//! Capability interfaces implemented for a host application.
//!
//! A host plugs the delivery engine in through three narrow seams instead of
//! inheriting from it: an [`EventHandler`] receives business occurrences, an
//! [`ObservabilityWidget`] renders queue health, and a [`ModuleLifecycle`]
//! creates or drops the queue schema. Configuration is read through a
//! [`TargetSource`] on every call, never from process-wide state.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use ferry_core::{models::OutboundEvent, storage::schema};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;

use crate::{
    coordinator::{DeliveryCoordinator, DispatchOutcome},
    error::Result,
    stats::{StatsReporter, StatusLine},
    target::WebhookTarget,
};

/// Trigger codes forwarded when no explicit subscription is given.
pub const DEFAULT_TRIGGERS: [&str; 3] = ["BILL_VALIDATE", "PROPAL_VALIDATE", "PRODUCT_CREATE"];

/// Supplies the current delivery target.
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Current target; may be unconfigured.
    async fn target(&self) -> WebhookTarget;
}

#[async_trait]
impl TargetSource for WebhookTarget {
    async fn target(&self) -> WebhookTarget {
        self.clone()
    }
}

/// A business occurrence reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    /// Host action name, e.g. `BILL_VALIDATE`.
    pub action: String,
    /// Business fields of the affected object.
    pub object: serde_json::Value,
}

/// What an [`EventHandler`] did with a host event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "handled", rename_all = "snake_case")]
pub enum HandlerOutcome {
    /// The action is not subscribed.
    Ignored,
    /// The event was handed to the coordinator.
    Dispatched(DispatchOutcome),
}

/// Receives domain events from the host.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one host event.
    async fn handle(&self, event: HostEvent) -> Result<HandlerOutcome>;
}

/// Forwards subscribed host events to the coordinator.
pub struct WebhookEventHandler {
    coordinator: Arc<DeliveryCoordinator>,
    targets: Arc<dyn TargetSource>,
    triggers: BTreeSet<String>,
}

impl WebhookEventHandler {
    /// Creates a handler subscribed to [`DEFAULT_TRIGGERS`].
    pub fn new(coordinator: Arc<DeliveryCoordinator>, targets: Arc<dyn TargetSource>) -> Self {
        Self {
            coordinator,
            targets,
            triggers: DEFAULT_TRIGGERS.iter().map(|code| (*code).to_string()).collect(),
        }
    }

    /// Replaces the subscribed trigger codes.
    #[must_use]
    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers = triggers.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true when `action` is forwarded.
    pub fn is_subscribed(&self, action: &str) -> bool {
        self.triggers.contains(action)
    }
}

#[async_trait]
impl EventHandler for WebhookEventHandler {
    async fn handle(&self, event: HostEvent) -> Result<HandlerOutcome> {
        if !self.is_subscribed(&event.action) {
            debug!(action = %event.action, "action not subscribed, ignoring");
            return Ok(HandlerOutcome::Ignored);
        }

        let target = self.targets.target().await;
        let outbound = OutboundEvent::new(event.action, event.object);
        let outcome = self.coordinator.attempt_immediate(&outbound, &target).await?;

        Ok(HandlerOutcome::Dispatched(outcome))
    }
}

/// Renders queue health for a dashboard.
#[async_trait]
pub trait ObservabilityWidget: Send + Sync {
    /// Widget heading.
    fn title(&self) -> &str;

    /// Current status lines.
    async fn lines(&self) -> Result<Vec<StatusLine>>;
}

/// Widget showing pending and failed queue counts.
pub struct QueueStatusWidget {
    reporter: StatsReporter,
}

impl QueueStatusWidget {
    /// Creates a widget backed by `reporter`.
    pub fn new(reporter: StatsReporter) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl ObservabilityWidget for QueueStatusWidget {
    fn title(&self) -> &str {
        "Webhook delivery"
    }

    async fn lines(&self) -> Result<Vec<StatusLine>> {
        self.reporter.status_lines().await
    }
}

/// Creates and drops the queue schema when the host enables or removes the
/// module.
#[async_trait]
pub trait ModuleLifecycle: Send + Sync {
    /// Creates the schema; idempotent.
    async fn install(&self) -> Result<()>;

    /// Drops the schema and every queued entry.
    async fn uninstall(&self) -> Result<()>;
}

/// Lifecycle over a PostgreSQL pool.
pub struct PostgresLifecycle {
    pool: PgPool,
}

impl PostgresLifecycle {
    /// Creates a lifecycle adapter over `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModuleLifecycle for PostgresLifecycle {
    async fn install(&self) -> Result<()> {
        Ok(schema::install(&self.pool).await?)
    }

    async fn uninstall(&self) -> Result<()> {
        Ok(schema::uninstall(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{client::DeliveryClient, stats::Severity, storage::memory::InMemoryQueueStore};

    fn coordinator(store: Arc<InMemoryQueueStore>) -> Arc<DeliveryCoordinator> {
        Arc::new(DeliveryCoordinator::new(store, DeliveryClient::with_defaults().unwrap()))
    }

    #[tokio::test]
    async fn unsubscribed_actions_are_ignored() {
        let store = Arc::new(InMemoryQueueStore::new());
        let targets = Arc::new(WebhookTarget::default());
        let handler = WebhookEventHandler::new(coordinator(store.clone()), targets);

        let outcome = handler
            .handle(HostEvent { action: "USER_LOGIN".to_string(), object: json!({}) })
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Ignored);
        assert!(store.entries().await.is_empty());
    }

    #[tokio::test]
    async fn subscribed_action_reaches_receiver() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryQueueStore::new());
        let target = WebhookTarget::new(server.uri(), "secret", "org");
        let handler = WebhookEventHandler::new(coordinator(store), Arc::new(target))
            .with_triggers(["ORDER_CLOSE"]);

        assert!(!handler.is_subscribed("BILL_VALIDATE"));
        let outcome = handler
            .handle(HostEvent { action: "ORDER_CLOSE".to_string(), object: json!({"ref": "C1"}) })
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            HandlerOutcome::Dispatched(DispatchOutcome::Delivered { status_code: 204, .. })
        ));
    }

    #[tokio::test]
    async fn widget_renders_store_counts() {
        let store = Arc::new(InMemoryQueueStore::new());
        let widget = QueueStatusWidget::new(StatsReporter::new(store));

        let lines = widget.lines().await.unwrap();

        assert_eq!(widget.title(), "Webhook delivery");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].severity, Severity::Ok);
    }
}
