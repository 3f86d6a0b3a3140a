//! Configuration management for the ferry service.

use std::{fmt, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use ferry_delivery::{
    host::DEFAULT_TRIGGERS, BackoffPolicy, ClientConfig, CoordinatorConfig, WebhookTarget,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "ferry.toml";
const ENV_PREFIX: &str = "FERRY_";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `FERRY_` (highest priority)
/// 2. Configuration file (`ferry.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// An empty `webhook_url` or `api_secret` is valid: the service starts, and
/// every delivery is skipped with a warning until both are set.
///
/// # Example
///
/// ```no_run
/// use ferry_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("Operator API on {}:{}", config.host, config.port);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `FERRY_DATABASE_URL`
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    pub database_min_connections: u32,
    /// Connection acquire timeout in seconds.
    pub database_connection_timeout: u64,

    // Server
    /// Operator API bind address.
    pub host: String,
    /// Operator API bind port.
    pub port: u16,
    /// Request timeout of the operator API in seconds.
    pub request_timeout: u64,
    /// Bearer token required by queue and event routes; open when unset.
    ///
    /// Environment variable: `FERRY_OPERATOR_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_token: Option<String>,

    // Target
    /// Receiver URL.
    ///
    /// Environment variable: `FERRY_WEBHOOK_URL`
    pub webhook_url: String,
    /// Shared HMAC secret.
    ///
    /// Environment variable: `FERRY_API_SECRET`
    pub api_secret: String,
    /// Organization identifier sent with every request.
    pub organization_id: String,
    /// Host actions forwarded by `POST /events`.
    pub triggers: Vec<String>,

    // Delivery
    /// TCP connect timeout in seconds.
    pub delivery_connect_timeout_seconds: u64,
    /// Total request timeout in seconds.
    pub delivery_timeout_seconds: u64,

    // Retry
    /// Attempts taken from the queue before an entry is failed.
    pub max_attempts: i32,
    /// Delay before the first retry, in seconds.
    pub retry_base_delay_seconds: u64,
    /// Exponent at which the backoff stops growing.
    pub retry_cap_exponent: u32,

    // Drain
    /// Entries attempted per drain.
    pub drain_limit: i64,
    /// Seconds between scheduled drains.
    pub drain_interval_seconds: u64,
    /// Wall-clock budget of one drain in seconds.
    pub drain_budget_seconds: u64,
    /// Seconds a claim is honored before the entry can be reclaimed; must
    /// exceed the drain budget plus the delivery timeout.
    pub claim_lease_seconds: u64,

    // Logging
    /// Default filter when `RUST_LOG` is unset.
    pub rust_log: String,
    /// `text` or `json`.
    pub log_format: String,
}

impl Config {
    /// Load configuration from defaults, `ferry.toml` and `FERRY_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// The layered configuration sources.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extracts and validates a configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Delivery target built from the configured URL and secret.
    pub fn to_target(&self) -> WebhookTarget {
        WebhookTarget::new(&self.webhook_url, &self.api_secret, &self.organization_id)
    }

    /// HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.delivery_connect_timeout_seconds),
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Backoff policy for queued entries.
    pub fn to_backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_secs(self.retry_base_delay_seconds),
            cap_exponent: self.retry_cap_exponent,
            max_attempts: self.max_attempts,
        }
    }

    /// Drain limits and claim lease.
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            drain_limit: self.drain_limit,
            drain_budget: Duration::from_secs(self.drain_budget_seconds),
            claim_lease: Duration::from_secs(self.claim_lease_seconds),
        }
    }

    /// Pause between scheduled drains.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_seconds)
    }

    /// Operator API request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Whether logs should be emitted as JSON.
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                if !self.database_url[colon_pos..].starts_with("://") {
                    let mut masked = self.database_url.clone();
                    masked.replace_range(colon_pos + 1..at_pos, "***");
                    return masked;
                }
            }
        }
        self.database_url.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database_min_connections cannot exceed database_max_connections");
        }

        let url = self.webhook_url.trim();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("webhook_url must be an http or https URL");
        }

        if self.max_attempts < 1 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        if self.retry_base_delay_seconds == 0 {
            anyhow::bail!("retry_base_delay_seconds must be greater than 0");
        }

        if self.drain_limit < 1 {
            anyhow::bail!("drain_limit must be at least 1");
        }

        if self.drain_interval_seconds == 0 {
            anyhow::bail!("drain_interval_seconds must be greater than 0");
        }

        if self.delivery_timeout_seconds == 0 || self.delivery_connect_timeout_seconds == 0 {
            anyhow::bail!("delivery timeouts must be greater than 0");
        }

        if self.drain_budget_seconds == 0 {
            anyhow::bail!("drain_budget_seconds must be greater than 0");
        }

        if self.claim_lease_seconds == 0 {
            anyhow::bail!("claim_lease_seconds must be greater than 0");
        }

        self.to_coordinator_config()
            .validate(self.to_client_config().timeout)
            .map_err(|e| anyhow::anyhow!("invalid drain settings: {e}"))?;

        if !matches!(self.log_format.to_ascii_lowercase().as_str(), "text" | "json") {
            anyhow::bail!("log_format must be 'text' or 'json'");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/ferry".to_string(),
            database_max_connections: 10,
            database_min_connections: 2,
            database_connection_timeout: 10,
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: 30,
            operator_token: None,
            webhook_url: String::new(),
            api_secret: String::new(),
            organization_id: String::new(),
            triggers: DEFAULT_TRIGGERS.iter().map(|code| (*code).to_string()).collect(),
            delivery_connect_timeout_seconds: ferry_delivery::DEFAULT_CONNECT_TIMEOUT_SECONDS,
            delivery_timeout_seconds: ferry_delivery::DEFAULT_TIMEOUT_SECONDS,
            max_attempts: ferry_delivery::DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_seconds: ferry_delivery::DEFAULT_BASE_DELAY_SECONDS,
            retry_cap_exponent: ferry_delivery::DEFAULT_CAP_EXPONENT,
            drain_limit: ferry_delivery::DEFAULT_DRAIN_LIMIT,
            drain_interval_seconds: ferry_delivery::DEFAULT_DRAIN_INTERVAL.as_secs(),
            drain_budget_seconds: 5 * 60,
            claim_lease_seconds: 6 * 60,
            rust_log: "info,ferry=debug,tower_http=debug".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url_masked())
            .field("host", &self.host)
            .field("port", &self.port)
            .field("operator_token", &self.operator_token.as_ref().map(|_| "***"))
            .field("webhook_url", &self.webhook_url)
            .field("api_secret", &"***")
            .field("organization_id", &self.organization_id)
            .field("triggers", &self.triggers)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_seconds", &self.retry_base_delay_seconds)
            .field("drain_limit", &self.drain_limit)
            .field("drain_interval_seconds", &self.drain_interval_seconds)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}
