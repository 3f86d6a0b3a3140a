//! Error types for webhook delivery operations.
//!
//! Transport failures, timeouts and non-2xx responses all feed the same
//! backoff path; they surface here so they can be logged and stored as the
//! entry's last error. Persistence failures are the one condition that can
//! lose an event and are always surfaced to the caller.

use std::fmt;

use ferry_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Connection refused, DNS failure or any other transport-level error.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Connect or overall request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Receiver answered with a status outside 2xx.
    #[error("remote rejection: HTTP {status_code}")]
    RemoteRejection {
        /// HTTP status code
        status_code: u16,
        /// Response body content, truncated
        body: String,
    },

    /// Every attempt allowed by the backoff policy failed.
    #[error("delivery failed after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts taken from the queue
        attempts: i32,
    },

    /// The queue store rejected a read or write.
    #[error("persistence failure: {message}")]
    PersistenceError {
        /// Storage error message
        message: String,
    },

    /// Target or client configuration is unusable.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// The event could not be turned into a request body.
    #[error("invalid event: {message}")]
    InvalidEvent {
        /// Validation or serialization error message
        message: String,
    },

    /// Queue entry does not exist.
    #[error("queue entry {id} not found")]
    NotFound {
        /// Requested entry id
        id: String,
    },

    /// Shutdown requested while work was pending.
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a remote rejection from an HTTP response.
    pub fn remote_rejection(status_code: u16, body: impl Into<String>) -> Self {
        Self::RemoteRejection { status_code, body: body.into() }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: i32) -> Self {
        Self::RetriesExhausted { attempts }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a not found error.
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Returns true for failures that feed the backoff path.
    ///
    /// The receiver cannot be told apart from a temporary outage, so every
    /// non-2xx status is retryable alongside transport errors and timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } | Self::RemoteRejection { .. } => true,

            Self::RetriesExhausted { .. }
            | Self::PersistenceError { .. }
            | Self::ConfigurationError { .. }
            | Self::InvalidEvent { .. }
            | Self::NotFound { .. }
            | Self::ShutdownRequested => false,
        }
    }

    /// Returns the HTTP status if the receiver answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RemoteRejection { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Database(message) | CoreError::ConstraintViolation(message) => {
                Self::PersistenceError { message }
            },
            CoreError::NotFound(message) => Self::NotFound { id: message },
            CoreError::InvalidInput(message) | CoreError::Serialization(message) => {
                Self::InvalidEvent { message }
            },
        }
    }
}

/// Failure taxonomy reported in logs and lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Target URL or secret absent or unusable.
    ConfigurationMissing,
    /// Connection refused, timeout, DNS failure.
    TransportFailure,
    /// HTTP status outside 2xx.
    RemoteRejection,
    /// The queue store could not accept a write.
    PersistenceFailure,
    /// Attempts reached the policy maximum.
    ExhaustedRetries,
    /// Bad input or shutdown.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => {
                Self::TransportFailure
            },
            DeliveryError::RemoteRejection { .. } => Self::RemoteRejection,
            DeliveryError::RetriesExhausted { .. } => Self::ExhaustedRetries,
            DeliveryError::PersistenceError { .. } => Self::PersistenceFailure,
            DeliveryError::ConfigurationError { .. } => Self::ConfigurationMissing,
            DeliveryError::InvalidEvent { .. }
            | DeliveryError::NotFound { .. }
            | DeliveryError::ShutdownRequested => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationMissing => write!(f, "configuration_missing"),
            Self::TransportFailure => write!(f, "transport_failure"),
            Self::RemoteRejection => write!(f, "remote_rejection"),
            Self::PersistenceFailure => write!(f, "persistence_failure"),
            Self::ExhaustedRetries => write!(f, "exhausted_retries"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_failures_are_retryable() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(10).is_retryable());
        assert!(DeliveryError::remote_rejection(500, "oops").is_retryable());
        assert!(DeliveryError::remote_rejection(404, "not found").is_retryable());

        assert!(!DeliveryError::persistence("disk full").is_retryable());
        assert!(!DeliveryError::configuration("missing secret").is_retryable());
        assert!(!DeliveryError::retries_exhausted(10).is_retryable());
        assert!(!DeliveryError::ShutdownRequested.is_retryable());
    }

    #[test]
    fn categories_follow_failure_taxonomy() {
        assert_eq!(
            ErrorCategory::from(&DeliveryError::timeout(10)),
            ErrorCategory::TransportFailure
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::remote_rejection(503, "")),
            ErrorCategory::RemoteRejection
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::persistence("pool timed out")),
            ErrorCategory::PersistenceFailure
        );
        assert_eq!(ErrorCategory::ExhaustedRetries.to_string(), "exhausted_retries");
    }

    #[test]
    fn core_errors_convert() {
        let err = DeliveryError::from(CoreError::Database("connection reset".to_string()));
        assert_eq!(err, DeliveryError::persistence("connection reset"));

        let err = DeliveryError::from(CoreError::InvalidInput("empty trigger".to_string()));
        assert!(matches!(err, DeliveryError::InvalidEvent { .. }));
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(10).to_string(), "request timeout after 10s");
        assert_eq!(
            DeliveryError::remote_rejection(502, "bad gateway").to_string(),
            "remote rejection: HTTP 502"
        );
        assert_eq!(DeliveryError::remote_rejection(502, "").status_code(), Some(502));
    }
}
