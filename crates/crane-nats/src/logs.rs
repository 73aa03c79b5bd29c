//! Per-job build output streaming.
//!
//! Output rides plain core NATS subjects: log consumers are ephemeral
//! tailers, and losing a chunk to a slow consumer must never block a build.

use uuid::Uuid;

use crate::client::BrokerClient;
use crate::{Error, Result, TRACING_TARGET_LOGS};

/// Publisher for per-job build output subjects.
#[derive(Debug, Clone)]
pub struct LogPublisher {
    client: async_nats::Client,
}

impl LogPublisher {
    /// Create a log publisher sharing the worker's connection.
    pub fn new(client: &BrokerClient) -> Self {
        Self {
            client: client.client().clone(),
        }
    }

    /// Subject output for a job is streamed to.
    pub fn subject(job_id: Uuid) -> String {
        format!("build.logs.{}", job_id)
    }

    /// Publish one chunk of build output.
    pub async fn publish(&self, job_id: Uuid, chunk: &[u8]) -> Result<()> {
        let subject = Self::subject(job_id);
        self.client
            .publish(subject.clone(), bytes::Bytes::copy_from_slice(chunk))
            .await
            .map_err(|e| {
                tracing::debug!(
                    target: TRACING_TARGET_LOGS,
                    job_id = %job_id,
                    error = %e,
                    "failed to publish log chunk"
                );
                Error::delivery_failed(&subject, e.to_string())
            })?;
        Ok(())
    }
}
