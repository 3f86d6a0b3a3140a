//! Destination settings supplied by the configuration store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where and how events are delivered.
///
/// Passed explicitly into every coordinator call. A target without a URL or
/// a secret is "not configured": events are dropped, nothing is queued.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTarget {
    /// Receiver endpoint.
    pub webhook_url: String,

    /// Shared HMAC secret.
    pub api_secret: String,

    /// Stable organization identifier sent with every request.
    #[serde(default)]
    pub organization_id: String,
}

impl WebhookTarget {
    /// Creates a target.
    pub fn new(
        webhook_url: impl Into<String>,
        api_secret: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            api_secret: api_secret.into(),
            organization_id: organization_id.into(),
        }
    }

    /// Returns true when both URL and secret are present.
    pub fn is_configured(&self) -> bool {
        !self.webhook_url.trim().is_empty() && !self.api_secret.is_empty()
    }
}

impl fmt::Debug for WebhookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookTarget")
            .field("webhook_url", &self.webhook_url)
            .field("api_secret", &"<redacted>")
            .field("organization_id", &self.organization_id)
            .finish()
    }
}
