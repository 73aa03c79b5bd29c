//! Worker error types.

use std::borrow::Cow;

/// Result type alias for worker operations.
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Worker error type.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Broker stream or acknowledgement failure.
    #[error("broker error: {0}")]
    Broker(#[from] crane_core::Error),

    /// Provider or instance operation failed.
    #[error("provider error: {0}")]
    Provider(#[from] crane_provider::Error),

    /// Build-script generation failed.
    #[error("script generation failed: {message}")]
    Script {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to process a job.
    #[error("job processing failed: {message}")]
    Processing {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl WorkerError {
    /// Creates a script-generation error with a message.
    pub fn script(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Script {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a script-generation error with a message and source.
    pub fn script_with_source(
        message: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Script {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a processing error with a message.
    pub fn processing(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a processing error with a message and source.
    pub fn processing_with_source(
        message: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
