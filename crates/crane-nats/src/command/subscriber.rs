//! Control subject subscription and publishing.

use futures::{Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use super::{ControlCommand, control_subject};
use crate::client::BrokerClient;
use crate::{Error, Result, TRACING_TARGET_COMMAND};

/// Single subscription to a queue's control subject.
pub struct CommandSubscriber {
    subscriber: async_nats::Subscriber,
    subject: String,
}

impl CommandSubscriber {
    /// Subscribe to the control subject for a queue.
    pub async fn subscribe(client: &BrokerClient, queue_name: &str) -> Result<Self> {
        let subject = control_subject(queue_name);
        let subscriber = client
            .client()
            .subscribe(subject.clone())
            .await
            .map_err(|e| Error::Connection(Box::new(e)))?;

        info!(
            target: TRACING_TARGET_COMMAND,
            subject = %subject,
            "subscribed to control subject"
        );

        Ok(Self {
            subscriber,
            subject,
        })
    }

    /// The subject this subscription listens on.
    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Turn the subscription into a stream of typed commands.
    ///
    /// Messages that fail to decode are dropped with a warning; the control
    /// plane may speak newer dialects than this worker.
    pub fn into_stream(self) -> impl Stream<Item = ControlCommand> + Send + Unpin {
        self.subscriber
            .filter_map(|message| async move {
                match serde_json::from_slice::<ControlCommand>(&message.payload) {
                    Ok(command) => Some(command),
                    Err(err) => {
                        warn!(
                            target: TRACING_TARGET_COMMAND,
                            error = %err,
                            "dropping undecodable control message"
                        );
                        None
                    }
                }
            })
            .boxed()
    }
}

/// Publisher side of the control subject, for operator tooling and tests.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    client: async_nats::Client,
    subject: String,
}

impl CommandPublisher {
    /// Create a publisher for a queue's control subject.
    pub fn new(client: &BrokerClient, queue_name: &str) -> Self {
        Self {
            client: client.client().clone(),
            subject: control_subject(queue_name),
        }
    }

    /// Publish a cancellation for the given job.
    pub async fn cancel_job(&self, job_id: Uuid, reason: Option<&str>) -> Result<()> {
        let command = ControlCommand::CancelJob {
            job_id,
            reason: reason.map(str::to_string),
        };
        let payload = serde_json::to_vec(&command)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| Error::delivery_failed(&self.subject, e.to_string()))?;

        info!(
            target: TRACING_TARGET_COMMAND,
            job_id = %job_id,
            subject = %self.subject,
            "published cancel command"
        );
        Ok(())
    }
}
