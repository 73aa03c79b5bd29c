//! Fire-and-forget metric emission.
//!
//! Counters are structured tracing events on a dedicated target; a
//! subscriber-side sink turns them into whatever registry the deployment
//! runs. Nothing here can block the state machine.

/// Tracing target metric events are emitted on.
pub const TRACING_TARGET_METRICS: &str = "crane_worker::metrics";

/// A job delivery was received.
pub const JOB_RECEIVED: &str = "worker.job.received";
/// A job ran its script to a normal exit (any exit code).
pub const JOB_FINISHED: &str = "worker.job.finished";
/// A job ran its script to exit zero.
pub const JOB_SUCCESS: &str = "worker.job.success";
/// A job was returned to the broker.
pub const JOB_REQUEUE: &str = "worker.job.requeue";
/// A job was cancelled by an operator.
pub const JOB_CANCELLED: &str = "worker.job.cancelled";
/// A job hit its hard timeout.
pub const JOB_TIMED_OUT: &str = "worker.job.timed_out";
/// A job went silent longer than its log timeout.
pub const JOB_STALLED: &str = "worker.job.stalled";
/// An undecodable delivery was dropped.
pub const JOB_DROPPED: &str = "worker.job.dropped";
/// Teardown retries were exhausted; an instance may have leaked.
pub const INSTANCE_LEAK: &str = "worker.instance.leak";

/// Increment a counter by one.
#[inline]
pub fn incr(counter: &'static str) {
    tracing::info!(
        target: TRACING_TARGET_METRICS,
        counter = counter,
        value = 1u64,
        "metric"
    );
}
