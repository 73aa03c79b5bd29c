//! Error types and utilities for NATS operations.

use std::time::Duration;

/// Result type for all NATS operations in this crate.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for NATS operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// NATS client/connection errors
    #[error("NATS connection error: {0}")]
    Connection(#[from] async_nats::Error),

    /// Serialization errors when sending or receiving messages
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timeout
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Message delivery failed
    #[error("message delivery failed to subject '{subject}': {reason}")]
    DeliveryFailed { subject: String, reason: String },

    /// Stream operation failed
    #[error("stream operation failed on '{stream}': {error}")]
    Stream { stream: String, error: String },

    /// Consumer operation failed
    #[error("consumer '{consumer}' error: {reason}")]
    Consumer { consumer: String, reason: String },

    /// Acknowledgement error
    #[error("acknowledgement error: {0}")]
    Ack(String),

    /// Invalid configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Generic operation error with context
    #[error("NATS operation failed: {operation} - {details}")]
    Operation { operation: String, details: String },
}

impl Error {
    /// Check if this error indicates a temporary failure that might succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Timeout { .. } | Error::DeliveryFailed { .. }
        )
    }

    /// Get the error category for metrics/logging.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Serialization(_) => "serialization",
            Error::Timeout { .. } => "timeout",
            Error::DeliveryFailed { .. } => "delivery",
            Error::Stream { .. } => "stream",
            Error::Consumer { .. } => "consumer",
            Error::Ack(_) => "ack",
            Error::InvalidConfig { .. } => "config",
            Error::Operation { .. } => "operation",
        }
    }

    /// Create a delivery failed error.
    pub fn delivery_failed(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a stream error.
    pub fn stream_error(stream: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Stream {
            stream: stream.into(),
            error: error.into(),
        }
    }

    /// Create a consumer error.
    pub fn consumer_error(consumer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Consumer {
            consumer: consumer.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a timeout error with the given duration.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { timeout: duration }
    }

    /// Create an operation error with context.
    pub fn operation(op: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Operation {
            operation: op.into(),
            details: details.into(),
        }
    }
}

impl From<Error> for crane_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Serialization(e) => crane_core::Error::Serialization(e),
            Error::Timeout { timeout } => crane_core::Error::Timeout { timeout },
            Error::Operation {
                operation,
                details,
            } => crane_core::Error::operation(operation, details),
            other => crane_core::Error::broker(other.to_string()),
        }
    }
}
