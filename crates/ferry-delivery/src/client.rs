//! HTTP client for signed webhook delivery.
//!
//! Sends one request per call and classifies the result. Retry policy lives
//! entirely in the coordinator; the client never retries on its own and
//! never follows redirects.

use std::time::{Duration, Instant};

use ferry_core::EntryId;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    signing::SignedBody,
};

/// Response bodies above this size are truncated.
const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Timeout for the whole request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Header carrying the hex HMAC-SHA256 of the body.
    pub signature_header: String,
    /// Header carrying the organization identifier.
    pub organization_header: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECONDS),
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: format!("Ferry-Webhook-Delivery/{}", env!("CARGO_PKG_VERSION")),
            signature_header: "X-Ferry-Signature".to_string(),
            organization_header: "X-Ferry-Organization-Id".to_string(),
        }
    }
}

/// A single outbound delivery.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Destination URL.
    pub url: String,
    /// Organization identifier header value.
    pub organization_id: String,
    /// Signed body.
    pub body: SignedBody,
    /// Queue entry being retried, if any.
    pub entry_id: Option<EntryId>,
    /// Queue attempt number, zero for the immediate attempt.
    pub attempt: i32,
}

/// Response from a 2xx delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Raw response body, truncated above 64 KiB.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

/// Classified result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Receiver answered 2xx.
    Success(DeliveryResponse),
    /// Non-2xx status, connection error or timeout.
    Failure(DeliveryError),
}

impl DeliveryOutcome {
    /// Returns true for a 2xx response.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// HTTP client for webhook delivery.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POSTs the signed body and classifies the result.
    pub async fn send(&self, request: &DeliveryRequest) -> DeliveryOutcome {
        let span = info_span!(
            "webhook_delivery",
            url = %request.url,
            entry_id = ?request.entry_id,
            attempt = request.attempt,
            payload_size = request.body.body().len(),
        );

        async move {
            let start_time = Instant::now();
            tracing::debug!("starting webhook delivery");

            let http_request = self
                .client
                .post(&request.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(self.config.signature_header.as_str(), request.body.signature())
                .header(self.config.organization_header.as_str(), &request.organization_id)
                .body(request.body.body().clone());

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let error = self.classify_transport_error(&e);
                    tracing::warn!(
                        duration_ms = start_time.elapsed().as_millis(),
                        error = %error,
                        "request failed"
                    );
                    return DeliveryOutcome::Failure(error);
                },
            };

            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();
            let body = read_body(response).await;
            let duration = start_time.elapsed();

            if is_success {
                tracing::info!(
                    status = status_code,
                    duration_ms = duration.as_millis(),
                    "webhook delivered"
                );
                DeliveryOutcome::Success(DeliveryResponse { status_code, body, duration })
            } else {
                tracing::warn!(
                    status = status_code,
                    duration_ms = duration.as_millis(),
                    "webhook rejected"
                );
                DeliveryOutcome::Failure(DeliveryError::remote_rejection(status_code, body))
            }
        }
        .instrument(span)
        .await
    }

    fn classify_transport_error(&self, e: &reqwest::Error) -> DeliveryError {
        if e.is_timeout() {
            let limit =
                if e.is_connect() { self.config.connect_timeout } else { self.config.timeout };
            return DeliveryError::timeout(limit.as_secs());
        }
        if e.is_connect() {
            return DeliveryError::network(format!("connection failed: {e}"));
        }
        DeliveryError::network(e.to_string())
    }
}

async fn read_body(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
            let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
            format!("{truncated}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read response body: {}", e);
            format!("[failed to read response body: {e}]")
        },
    }
}
