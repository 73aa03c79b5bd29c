//! Job queue management over a JetStream work queue.

use std::time::Duration;

use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use crane_core::{BuildJob, JobDelivery, JobFeed, JobSource};
use futures::StreamExt;
use tracing::{debug, instrument};

use super::delivery::NatsDelivery;
use crate::client::BrokerClient;
use crate::{Error, Result, TRACING_TARGET_QUEUE};

/// How long a pulled job may stay unacknowledged before the broker offers it
/// to another consumer. Must comfortably exceed the hard timeout plus the
/// cleanup budget.
const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(2 * 3600);

/// Long-poll window for a single-message fetch.
const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(30);

/// Work queue for build jobs.
///
/// Wraps a JetStream work-queue stream plus one durable pull consumer shared
/// by every processor. Each processor pulls a single message at a time, so
/// dispatch stays fair and a slow processor cannot hoard deliveries.
#[derive(Debug, Clone)]
pub struct JobQueue {
    jetstream: jetstream::Context,
    stream_name: String,
    queue_name: String,
    ack_wait: Duration,
    poll_window: Duration,
}

/// Stream name backing a queue.
fn stream_name(queue_name: &str) -> String {
    format!("BUILDS_{}", queue_name.to_uppercase())
}

/// Subject build jobs for a queue are published to.
fn job_subject(queue_name: &str) -> String {
    format!("builds.{}.job", queue_name)
}

impl JobQueue {
    /// Create a new job queue, provisioning the stream if needed.
    #[instrument(skip(client), target = TRACING_TARGET_QUEUE)]
    pub async fn new(client: &BrokerClient, queue_name: &str) -> Result<Self> {
        let jetstream = client.jetstream().clone();
        let stream_name = stream_name(queue_name);

        let stream_config = stream::Config {
            name: stream_name.clone(),
            description: Some(format!("Build job queue: {}", queue_name)),
            subjects: vec![job_subject(queue_name)],
            retention: stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };

        match jetstream.get_stream(&stream_name).await {
            Ok(_) => {
                debug!(
                    target: TRACING_TARGET_QUEUE,
                    stream = %stream_name,
                    "using existing build stream"
                );
            }
            Err(_) => {
                debug!(
                    target: TRACING_TARGET_QUEUE,
                    stream = %stream_name,
                    queue_name = %queue_name,
                    "creating new build stream"
                );
                jetstream
                    .create_stream(stream_config)
                    .await
                    .map_err(|e| Error::stream_error(&stream_name, e.to_string()))?;
            }
        }

        Ok(Self {
            jetstream,
            stream_name,
            queue_name: queue_name.to_string(),
            ack_wait: DEFAULT_ACK_WAIT,
            poll_window: DEFAULT_POLL_WINDOW,
        })
    }

    /// Set how long a delivery may stay unacknowledged before redelivery.
    #[must_use]
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Set the long-poll window used by [`JobStream::next`].
    #[must_use]
    pub fn with_poll_window(mut self, poll_window: Duration) -> Self {
        self.poll_window = poll_window;
        self
    }

    /// The queue name this instance consumes.
    #[inline]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Subject build jobs are published to.
    pub fn job_subject(&self) -> String {
        job_subject(&self.queue_name)
    }

    /// Submit a job to the queue.
    #[instrument(skip(self, job), target = TRACING_TARGET_QUEUE)]
    pub async fn submit(&self, job: &BuildJob) -> Result<()> {
        let subject = self.job_subject();
        let payload = serde_json::to_vec(job)?;

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| Error::delivery_failed(&subject, e.to_string()))?
            .await
            .map_err(|e| Error::operation("job_submit", e.to_string()))?;

        debug!(
            target: TRACING_TARGET_QUEUE,
            job_id = %job.job_id,
            subject = %subject,
            "submitted job to queue"
        );
        Ok(())
    }

    /// Create the shared durable pull consumer for this queue.
    async fn consumer(&self) -> Result<jetstream::consumer::PullConsumer> {
        let consumer_name = format!("workers_{}", self.queue_name);

        let consumer_config = jetstream::consumer::pull::Config {
            name: Some(consumer_name.clone()),
            durable_name: Some(consumer_name.clone()),
            description: Some(format!("Build workers for queue {}", self.queue_name)),
            ack_wait: self.ack_wait,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| Error::stream_error(&self.stream_name, e.to_string()))?;

        let consumer = stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| Error::consumer_error(&consumer_name, e.to_string()))?;

        debug!(
            target: TRACING_TARGET_QUEUE,
            consumer = %consumer_name,
            stream = %self.stream_name,
            "created worker consumer"
        );
        Ok(consumer)
    }
}

#[async_trait]
impl JobFeed for JobQueue {
    async fn subscribe(&self) -> crane_core::Result<Box<dyn JobSource>> {
        let consumer = self.consumer().await.map_err(crane_core::Error::from)?;
        Ok(Box::new(JobStream {
            consumer,
            poll_window: self.poll_window,
        }))
    }
}

/// One processor's pull stream over the shared consumer.
///
/// Every call to [`next`](JobSource::next) fetches at most one message and
/// waits at most the poll window, so the stream never holds an
/// unacknowledged delivery on behalf of an idle processor.
pub struct JobStream {
    consumer: jetstream::consumer::PullConsumer,
    poll_window: Duration,
}

#[async_trait]
impl JobSource for JobStream {
    async fn next(&mut self) -> crane_core::Result<Option<JobDelivery>> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(self.poll_window)
            .messages()
            .await
            .map_err(|e| crane_core::Error::broker(e.to_string()))?;

        match batch.next().await {
            Some(Ok(message)) => {
                let payload = message.payload.clone();
                Ok(Some(JobDelivery::new(
                    payload,
                    Box::new(NatsDelivery::new(message)),
                )))
            }
            Some(Err(e)) => Err(crane_core::Error::broker(e.to_string())),
            // Poll window elapsed with no pending job.
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_subject_generation() {
        assert_eq!(job_subject("linux"), "builds.linux.job");
    }

    #[test]
    fn stream_name_generation() {
        assert_eq!(stream_name("linux"), "BUILDS_LINUX");
        assert_eq!(stream_name("macos-stable"), "BUILDS_MACOS-STABLE");
    }
}
