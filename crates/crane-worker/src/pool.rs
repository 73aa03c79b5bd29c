//! Processor pool supervision.
//!
//! The pool owns N processors for the lifetime of the daemon. Two tokens
//! govern shutdown: *graceful* stops intake and lets in-flight jobs finish;
//! *hard* fires when the drain budget runs out and aborts whatever is left
//! (the broker redelivers those jobs).

use std::sync::Arc;
use std::time::Duration;

use crane_core::JobFeed;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::processor::Processor;
use crate::state::WorkerState;
use crate::{Result, TRACING_TARGET_POOL, WorkerError};

/// Fixed-size pool of processors over a shared broker subscription.
pub struct ProcessorPool {
    state: WorkerState,
    feed: Arc<dyn JobFeed>,
    graceful: CancellationToken,
    hard_stop: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl ProcessorPool {
    /// Create a pool over the given feed.
    pub fn new(state: WorkerState, feed: Arc<dyn JobFeed>) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            state,
            feed,
            graceful: CancellationToken::new(),
            hard_stop: CancellationToken::new(),
            done_tx,
            done_rx,
        }
    }

    /// Handle for initiating and awaiting shutdown from other tasks.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            graceful: self.graceful.clone(),
            hard_stop: self.hard_stop.clone(),
            done: self.done_rx.clone(),
            drain_budget: self.state.config.shutdown_timeout(),
        }
    }

    /// Run the pool until every processor has exited.
    ///
    /// Returns an error when a processor loses the broker stream or the
    /// pool cannot (re)subscribe; the pool never reconnects on its own.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL, name = "pool")]
    pub async fn run(self) -> Result<()> {
        let result = self.run_inner().await;
        let _ = self.done_tx.send(true);
        result
    }

    async fn run_inner(&self) -> Result<()> {
        let pool_size = self.state.config.pool_size;
        info!(
            target: TRACING_TARGET_POOL,
            pool_size = pool_size,
            queue = %self.state.config.queue_name,
            provider = self.state.provider.name(),
            "starting processor pool"
        );

        let mut join_set = JoinSet::new();
        for id in 0..pool_size {
            self.spawn_processor(&mut join_set, id).await?;
        }

        let mut next_id = pool_size;
        let mut result = Ok(());

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, Ok(()))) => {
                    info!(target: TRACING_TARGET_POOL, processor = id, "processor exited");
                }
                Ok((id, Err(err))) => {
                    error!(
                        target: TRACING_TARGET_POOL,
                        processor = id,
                        error = %err,
                        "processor failed, draining pool"
                    );
                    // Broker loss is surfaced to the caller, not retried.
                    self.graceful.cancel();
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(
                        target: TRACING_TARGET_POOL,
                        error = %join_err,
                        "processor panicked"
                    );
                    if self.graceful.is_cancelled() {
                        continue;
                    }
                    match self.spawn_processor(&mut join_set, next_id).await {
                        Ok(()) => {
                            warn!(
                                target: TRACING_TARGET_POOL,
                                processor = next_id,
                                "replaced panicked processor"
                            );
                            next_id += 1;
                        }
                        Err(err) => {
                            error!(
                                target: TRACING_TARGET_POOL,
                                error = %err,
                                "failed to replace panicked processor, draining pool"
                            );
                            self.graceful.cancel();
                            if result.is_ok() {
                                result = Err(err);
                            }
                        }
                    }
                }
                Err(_cancelled) => {}
            }
        }

        info!(target: TRACING_TARGET_POOL, "all processors exited");
        result
    }

    async fn spawn_processor(
        &self,
        join_set: &mut JoinSet<(usize, Result<()>)>,
        id: usize,
    ) -> Result<()> {
        let source = self.feed.subscribe().await.map_err(WorkerError::from)?;
        let processor = Processor::new(
            id,
            self.state.clone(),
            source,
            self.graceful.clone(),
            self.hard_stop.clone(),
        );

        info!(target: TRACING_TARGET_POOL, processor = id, "spawning processor");
        join_set.spawn(async move { (id, processor.run().await) });
        Ok(())
    }
}

/// Cheap handle for driving pool shutdown from signal handlers and tests.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    graceful: CancellationToken,
    hard_stop: CancellationToken,
    done: watch::Receiver<bool>,
    drain_budget: Duration,
}

impl PoolHandle {
    /// Initiate graceful shutdown and wait for the pool to drain.
    ///
    /// Idempotent and safe to call concurrently. When the drain budget is
    /// exhausted the remaining processors are hard-stopped and the call
    /// returns; their jobs requeue through the broker's ack deadline.
    pub async fn shutdown(&self) {
        self.graceful.cancel();
        info!(
            target: TRACING_TARGET_POOL,
            budget_secs = self.drain_budget.as_secs(),
            "graceful shutdown initiated"
        );

        let mut done = self.done.clone();
        let drained = tokio::time::timeout(self.drain_budget, async move {
            // An error means the pool is gone entirely, which also counts.
            let _ = done.wait_for(|drained| *drained).await;
        })
        .await;

        if drained.is_err() {
            warn!(
                target: TRACING_TARGET_POOL,
                budget_secs = self.drain_budget.as_secs(),
                "shutdown budget exhausted, hard-stopping processors"
            );
            self.hard_stop.cancel();
        } else {
            info!(target: TRACING_TARGET_POOL, "pool drained");
        }
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.graceful.is_cancelled()
    }
}
