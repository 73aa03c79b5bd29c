//! Provider error types.

use std::time::Duration;

/// Result type for provider operations.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for provider and instance operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend configuration is invalid
    #[error("invalid provider configuration: {reason}")]
    Config { reason: String },

    /// One-shot initialization failed
    #[error("provider setup failed: {reason}")]
    Setup { reason: String },

    /// Provisioning failed; no resources remain allocated
    #[error("instance start failed: {reason}")]
    Start { reason: String },

    /// Installing the build script failed
    #[error("script upload failed: {reason}")]
    Upload { reason: String },

    /// Executing the build script failed (infrastructure, not script exit)
    #[error("script execution failed: {reason}")]
    Run { reason: String },

    /// Tearing the instance down failed
    #[error("instance stop failed after {attempts} attempt(s): {reason}")]
    Stop { attempts: u32, reason: String },

    /// Operation timeout
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Operation observed a cancellation signal
    #[error("operation cancelled")]
    Cancelled,

    /// The backend does not implement this optional operation
    #[error("operation not implemented: {operation}")]
    NotImplemented { operation: &'static str },

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic operation error with context
    #[error("provider operation failed: {operation} - {details}")]
    Operation { operation: String, details: String },
}

impl Error {
    /// Check if this error indicates a temporary failure that might succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Io(_))
    }

    /// Get the error category for metrics/logging.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::Setup { .. } => "setup",
            Error::Start { .. } => "start",
            Error::Upload { .. } => "upload",
            Error::Run { .. } => "run",
            Error::Stop { .. } => "stop",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
            Error::NotImplemented { .. } => "not_implemented",
            Error::Io(_) => "io",
            Error::Operation { .. } => "operation",
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a setup error.
    pub fn setup(reason: impl Into<String>) -> Self {
        Self::Setup {
            reason: reason.into(),
        }
    }

    /// Create a start error.
    pub fn start(reason: impl Into<String>) -> Self {
        Self::Start {
            reason: reason.into(),
        }
    }

    /// Create an upload error.
    pub fn upload(reason: impl Into<String>) -> Self {
        Self::Upload {
            reason: reason.into(),
        }
    }

    /// Create a run error.
    pub fn run(reason: impl Into<String>) -> Self {
        Self::Run {
            reason: reason.into(),
        }
    }

    /// Create a stop error.
    pub fn stop(attempts: u32, reason: impl Into<String>) -> Self {
        Self::Stop {
            attempts,
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
