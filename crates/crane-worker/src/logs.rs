//! Build output plumbing.
//!
//! Output flows instance → [`JobLogger`] → per-job sink. The logger records
//! when the last byte arrived so the processor's silence watchdog can tell a
//! slow build from a dead one.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use crane_nats::LogPublisher;
use crane_provider::LogSink;
use tokio::time::Instant;
use uuid::Uuid;

use crate::TRACING_TARGET_LOGS;

/// Hands out a log sink per job.
pub trait BuildLogs: Send + Sync {
    /// Sink output for the given job is streamed to.
    fn sink_for(&self, job_id: Uuid) -> Arc<dyn LogSink>;
}

/// [`BuildLogs`] implementation that streams output over the broker.
#[derive(Debug, Clone)]
pub struct BrokerBuildLogs {
    publisher: LogPublisher,
}

impl BrokerBuildLogs {
    /// Create build logs backed by the given publisher.
    pub fn new(publisher: LogPublisher) -> Self {
        Self { publisher }
    }
}

impl BuildLogs for BrokerBuildLogs {
    fn sink_for(&self, job_id: Uuid) -> Arc<dyn LogSink> {
        Arc::new(BrokerLogSink {
            publisher: self.publisher.clone(),
            job_id,
        })
    }
}

struct BrokerLogSink {
    publisher: LogPublisher,
    job_id: Uuid,
}

#[async_trait]
impl LogSink for BrokerLogSink {
    async fn write(&self, chunk: &[u8]) -> std::io::Result<()> {
        // Log delivery is best-effort: a broker hiccup must not fail the
        // build that produced the output.
        if let Err(err) = self.publisher.publish(self.job_id, chunk).await {
            tracing::warn!(
                target: TRACING_TARGET_LOGS,
                job_id = %self.job_id,
                error = %err,
                "dropping build output chunk"
            );
        }
        Ok(())
    }
}

/// Sink wrapper that tracks output activity for the silence watchdog.
pub struct JobLogger {
    sink: Arc<dyn LogSink>,
    last_activity: Mutex<Instant>,
}

impl JobLogger {
    /// Wrap a sink, starting the activity clock now.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// How long since the last output byte arrived.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }
}

#[async_trait]
impl LogSink for JobLogger {
    async fn write(&self, chunk: &[u8]) -> std::io::Result<()> {
        self.touch();
        self.sink.write(chunk).await
    }
}
