//! Error types shared across the worker crates.

use std::time::Duration;

/// Result type for core operations.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for broker-facing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Broker transport failure (connection lost, consumer gone)
    #[error("broker error: {reason}")]
    Broker { reason: String },

    /// Serialization errors when decoding or encoding payloads
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timeout
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Operation observed a cancellation signal
    #[error("operation cancelled")]
    Cancelled,

    /// Generic operation error with context
    #[error("operation failed: {operation} - {details}")]
    Operation { operation: String, details: String },
}

impl Error {
    /// Check if this error indicates a temporary failure that might succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Broker { .. } | Error::Timeout { .. })
    }

    /// Get the error category for metrics/logging.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Broker { .. } => "broker",
            Error::Serialization(_) => "serialization",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
            Error::Operation { .. } => "operation",
        }
    }

    /// Create a broker transport error.
    pub fn broker(reason: impl Into<String>) -> Self {
        Self::Broker {
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
