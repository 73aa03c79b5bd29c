//! Terminal disposition of a JetStream delivery.

use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use crane_core::JobHandle;
use tracing::debug;

use crate::TRACING_TARGET_QUEUE;

/// Disposition handle for one JetStream message.
///
/// Consuming `self` keeps the at-most-one-ack property of the core contract:
/// once a processor decides, the message is gone from this worker.
pub struct NatsDelivery {
    message: jetstream::Message,
}

impl NatsDelivery {
    pub(crate) fn new(message: jetstream::Message) -> Self {
        Self { message }
    }
}

#[async_trait]
impl JobHandle for NatsDelivery {
    async fn ack(self: Box<Self>) -> crane_core::Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| crane_core::Error::broker(format!("ack failed: {e}")))
    }

    async fn nack(self: Box<Self>, requeue: bool) -> crane_core::Result<()> {
        let kind = if requeue {
            // Immediate redelivery to the next consumer that asks.
            AckKind::Nak(None)
        } else {
            // Terminal reject: the broker drops the message.
            AckKind::Term
        };

        debug!(
            target: TRACING_TARGET_QUEUE,
            requeue = requeue,
            "rejecting delivery"
        );

        self.message
            .ack_with(kind)
            .await
            .map_err(|e| crane_core::Error::broker(format!("nack failed: {e}")))
    }
}
