//! Ferry operator and producer HTTP API.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use ferry_delivery::{
    DeliveryCoordinator, EventHandler, ObservabilityWidget, QueueStatusWidget, QueueStore,
    StatsReporter, TargetSource, WebhookEventHandler,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Delivery coordinator.
    pub coordinator: Arc<DeliveryCoordinator>,
    /// Current delivery target.
    pub targets: Arc<dyn TargetSource>,
    /// Receives events posted by producers.
    pub events: Arc<dyn EventHandler>,
    /// Dashboard widget over the queue counts.
    pub widget: Arc<dyn ObservabilityWidget>,
    /// Bearer token guarding queue and event routes.
    pub operator_token: Option<Arc<str>>,
}

impl AppState {
    /// Builds the state with the standard event handler and queue widget.
    pub fn new(
        store: Arc<dyn QueueStore>,
        coordinator: Arc<DeliveryCoordinator>,
        targets: Arc<dyn TargetSource>,
    ) -> Self {
        let events = WebhookEventHandler::new(coordinator.clone(), targets.clone());
        Self {
            coordinator,
            targets,
            events: Arc::new(events),
            widget: Arc::new(QueueStatusWidget::new(StatsReporter::new(store))),
            operator_token: None,
        }
    }

    /// Requires `token` on protected routes; `None` leaves them open.
    #[must_use]
    pub fn with_operator_token(mut self, token: Option<String>) -> Self {
        self.operator_token = token.filter(|t| !t.is_empty()).map(Arc::from);
        self
    }

    /// Replaces the event handler.
    #[must_use]
    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }
}
