//! Broker contracts consumed by the processor pool.
//!
//! The broker layer implements these traits; the pool and its processors
//! only ever see them. Delivery is at-least-once — the [`JobHandle`] is how
//! a processor makes the terminal choice exactly once.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BuildJob, Result};

/// Terminal disposition of one delivery.
///
/// The handle is consumed by either call, so a delivery can be acked or
/// nacked at most once.
#[async_trait]
pub trait JobHandle: Send + Sync {
    /// Acknowledge the delivery; the broker must not offer it again.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Reject the delivery. With `requeue` the broker offers it to the next
    /// consumer; without, it is dropped.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<()>;
}

/// One delivery pulled from the broker: the raw payload plus its handle.
pub struct JobDelivery {
    payload: Bytes,
    handle: Box<dyn JobHandle>,
}

impl JobDelivery {
    /// Wrap a raw payload and its disposition handle.
    pub fn new(payload: impl Into<Bytes>, handle: Box<dyn JobHandle>) -> Self {
        Self {
            payload: payload.into(),
            handle,
        }
    }

    /// Raw payload bytes as delivered.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Decode the payload into a [`BuildJob`].
    pub fn job(&self) -> Result<BuildJob> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Give up the payload and keep only the disposition handle.
    pub fn into_handle(self) -> Box<dyn JobHandle> {
        self.handle
    }
}

impl std::fmt::Debug for JobDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDelivery")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// A processor's private view of the queue.
///
/// Implementations must not buffer more than one unacknowledged delivery,
/// so a slow processor cannot hoard work (prefetch stays at 1).
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Wait for the next delivery.
    ///
    /// `Ok(None)` means the poll window elapsed with nothing to do; callers
    /// loop. `Err` means the broker stream is gone and the caller should
    /// surface the failure instead of reconnecting.
    async fn next(&mut self) -> Result<Option<JobDelivery>>;
}

/// Shared queue handle that hands each processor its own [`JobSource`].
#[async_trait]
pub trait JobFeed: Send + Sync {
    /// Open a new source against the shared consumer session.
    async fn subscribe(&self) -> Result<Box<dyn JobSource>>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::job::Repository;

    struct CountingHandle {
        acks: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobHandle for CountingHandle {
        async fn ack(self: Box<Self>) -> Result<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(self: Box<Self>, _requeue: bool) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivery_decodes_payload() {
        let job = BuildJob::new(Repository::new("octo/repo", "deadbeef"));
        let payload = serde_json::to_vec(&job).unwrap();
        let acks = Arc::new(AtomicU32::new(0));

        let delivery = JobDelivery::new(payload, Box::new(CountingHandle { acks: acks.clone() }));
        let decoded = delivery.job().unwrap();
        assert_eq!(decoded.job_id, job.job_id);

        delivery.into_handle().ack().await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_surfaces_parse_failure() {
        let acks = Arc::new(AtomicU32::new(0));
        let delivery = JobDelivery::new(
            &b"not json"[..],
            Box::new(CountingHandle { acks: acks.clone() }),
        );
        assert!(delivery.job().is_err());
    }
}
