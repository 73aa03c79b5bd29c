//! Per-worker job state machine.
//!
//! A processor owns at most one job at a time and drives it strictly
//! sequentially: Idle → Receiving → Provisioning → Running → Cleaning →
//! back to Idle, with Stopping as the terminal state when the pool shuts
//! down. Two contexts exist per job: the *work* context, cancelled by a
//! cancel command, a timeout, or the pool's hard stop; and the *cleanup*
//! context, derived only from the hard stop, so teardown survives whatever
//! killed the job.

use std::time::Duration;

use crane_core::{BuildJob, JobDelivery, JobHandle, JobSource};
use crane_provider::{BootProgress, Instance, Progress, RetryConfig, StartAttributes};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::CancelRegistration;
use crate::logs::JobLogger;
use crate::metrics;
use crate::state::WorkerState;
use crate::{Result, TRACING_TARGET_PROCESSOR};

/// Where a processor currently is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Waiting for a delivery.
    Idle,
    /// Decoding a delivery and registering the cancel signal.
    Receiving,
    /// Waiting for the provider to hand over an instance.
    Provisioning,
    /// Script is executing on the instance.
    Running,
    /// Tearing the instance down and settling the delivery.
    Cleaning,
    /// Terminal: the processor exited.
    Stopping,
}

impl ProcessorState {
    /// Snake-case name for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorState::Idle => "idle",
            ProcessorState::Receiving => "receiving",
            ProcessorState::Provisioning => "provisioning",
            ProcessorState::Running => "running",
            ProcessorState::Cleaning => "cleaning",
            ProcessorState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal disposition of one job on this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Script ran to a normal exit; a non-zero code is the build's verdict,
    /// not an infrastructure failure.
    Finished { exit_code: i32 },
    /// An operator cancelled the job.
    Cancelled { reason: Option<String> },
    /// The hard timeout expired.
    TimedOut,
    /// No output for longer than the log-silence timeout.
    Stalled,
    /// Errored before the script could complete; the broker offers the job
    /// to the next worker.
    Requeued { error: String },
}

impl JobOutcome {
    /// Snake-case status for logs and metrics.
    pub fn status(&self) -> &'static str {
        match self {
            JobOutcome::Finished { .. } => "finished",
            JobOutcome::Cancelled { .. } => "cancelled",
            JobOutcome::TimedOut => "timed_out",
            JobOutcome::Stalled => "stalled",
            JobOutcome::Requeued { .. } => "requeued",
        }
    }

    /// Whether the delivery goes back to the broker.
    pub fn requeues(&self) -> bool {
        matches!(self, JobOutcome::Requeued { .. })
    }
}

/// Why the run phase was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cut {
    Cancelled,
    HardTimeout,
    Stalled,
    Stopped,
}

struct JobRun {
    outcome: JobOutcome,
    instance: Option<Box<dyn Instance>>,
    registration: CancelRegistration,
}

/// One worker in the pool.
pub struct Processor {
    id: usize,
    state: WorkerState,
    source: Box<dyn JobSource>,
    graceful: CancellationToken,
    hard_stop: CancellationToken,
    state_tx: watch::Sender<ProcessorState>,
    state_rx: watch::Receiver<ProcessorState>,
}

impl Processor {
    /// Create a processor over its private job source.
    ///
    /// `graceful` stops the intake of new jobs; `hard_stop` additionally
    /// aborts the in-flight job and its cleanup.
    pub fn new(
        id: usize,
        state: WorkerState,
        source: Box<dyn JobSource>,
        graceful: CancellationToken,
        hard_stop: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ProcessorState::Idle);
        Self {
            id,
            state,
            source,
            graceful,
            hard_stop,
            state_tx,
            state_rx,
        }
    }

    /// The processor's id within the pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Watch the processor's state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ProcessorState> {
        self.state_rx.clone()
    }

    fn set_state(&self, next: ProcessorState) {
        debug!(
            target: TRACING_TARGET_PROCESSOR,
            processor = self.id,
            state = next.as_str(),
            "state transition"
        );
        self.state_tx.send_replace(next);
    }

    /// Run the processor until the pool asks it to stop.
    ///
    /// Returns an error only when the job source fails; the pool treats
    /// that as broker loss and surfaces it.
    #[tracing::instrument(
        skip(self),
        fields(processor = self.id),
        target = TRACING_TARGET_PROCESSOR,
        name = "processor"
    )]
    pub async fn run(mut self) -> Result<()> {
        info!(target: TRACING_TARGET_PROCESSOR, "starting processor");
        let graceful = self.graceful.clone();

        loop {
            self.set_state(ProcessorState::Idle);

            tokio::select! {
                biased;

                () = graceful.cancelled() => break,

                next = self.source.next() => match next {
                    Ok(Some(delivery)) => self.process(delivery).await,
                    Ok(None) => continue,
                    Err(err) => {
                        error!(
                            target: TRACING_TARGET_PROCESSOR,
                            error = %err,
                            "job source failed, stopping processor"
                        );
                        self.set_state(ProcessorState::Stopping);
                        return Err(err.into());
                    }
                },
            }
        }

        self.set_state(ProcessorState::Stopping);
        info!(target: TRACING_TARGET_PROCESSOR, "processor stopped");
        Ok(())
    }

    /// Drive one delivery through the full lifecycle.
    async fn process(&mut self, delivery: JobDelivery) {
        self.set_state(ProcessorState::Receiving);
        metrics::incr(metrics::JOB_RECEIVED);

        let job = match delivery.job() {
            Ok(job) => job,
            Err(err) => {
                warn!(
                    target: TRACING_TARGET_PROCESSOR,
                    error = %err,
                    "undecodable job payload, dropping delivery"
                );
                metrics::incr(metrics::JOB_DROPPED);
                if let Err(nack_err) = delivery.into_handle().nack(false).await {
                    error!(
                        target: TRACING_TARGET_PROCESSOR,
                        error = %nack_err,
                        "failed to drop delivery"
                    );
                }
                return;
            }
        };

        info!(
            target: TRACING_TARGET_PROCESSOR,
            job_id = %job.job_id,
            repository = %job.repository.slug,
            commit = %job.repository.commit,
            "processing job"
        );

        let run = self.execute(&job).await;

        self.set_state(ProcessorState::Cleaning);
        if let Some(instance) = &run.instance {
            self.stop_instance(job.job_id, instance.as_ref()).await;
        }
        // Deregistration happens on leaving the cleaning phase.
        drop(run.registration);

        self.finish(&job, run.outcome, delivery.into_handle()).await;
    }

    async fn execute(&self, job: &BuildJob) -> JobRun {
        let config = &self.state.config;
        let hard_timeout = job.timeouts.hard(config.hard_timeout());
        let log_timeout = job.timeouts.log_silence(config.log_timeout());
        let job_started = Instant::now();

        // Work context: dies on a cancel command, a timeout below, or the
        // pool's hard stop.
        let work = self.hard_stop.child_token();
        let registration = self.state.dispatcher.register(job.job_id, work.clone());

        self.set_state(ProcessorState::Provisioning);
        let instance = match self.provision(job, &work, hard_timeout).await {
            Ok(instance) => instance,
            Err(mut outcome) => {
                if let JobOutcome::Cancelled { reason } = &mut outcome {
                    *reason = registration.cancel_reason();
                }
                return JobRun {
                    outcome,
                    instance: None,
                    registration,
                };
            }
        };

        info!(
            target: TRACING_TARGET_PROCESSOR,
            job_id = %job.job_id,
            instance_id = instance.id(),
            image = instance.image_name(),
            startup_ms = instance.startup_duration().as_millis() as u64,
            warmed = instance.warmed(),
            "instance ready"
        );

        self.set_state(ProcessorState::Running);
        let outcome = self
            .run_build(
                job,
                instance.as_ref(),
                &work,
                &registration,
                job_started,
                hard_timeout,
                log_timeout,
            )
            .await;

        JobRun {
            outcome,
            instance: Some(instance),
            registration,
        }
    }

    /// Start an instance under the work context plus the startup budget.
    ///
    /// On failure no instance exists (start self-cleans), so the caller
    /// skips straight to settling the delivery.
    async fn provision(
        &self,
        job: &BuildJob,
        work: &CancellationToken,
        hard_timeout: Duration,
    ) -> std::result::Result<Box<dyn Instance>, JobOutcome> {
        let config = &self.state.config;
        let provider = &self.state.provider;

        let attrs = StartAttributes {
            job_id: job.job_id,
            image_name: job.image.name.clone(),
            image_group: job.image.group.clone(),
            language: job.language.clone(),
        };

        let budget = config.startup_timeout().min(hard_timeout);
        let started = tokio::time::timeout(budget, async {
            if provider.supports_progress() {
                let progress = TraceProgress { job_id: job.job_id };
                provider.start_with_progress(work, &attrs, &progress).await
            } else {
                provider.start(work, &attrs).await
            }
        })
        .await;

        match started {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(crane_provider::Error::Cancelled)) => {
                if self.hard_stop.is_cancelled() {
                    Err(JobOutcome::Requeued {
                        error: "worker stopped during provisioning".to_string(),
                    })
                } else {
                    // Reason is patched in by the caller, which holds the
                    // registration.
                    Err(JobOutcome::Cancelled { reason: None })
                }
            }
            Ok(Err(err)) => {
                warn!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job.job_id,
                    error = %err,
                    "provisioning failed"
                );
                Err(JobOutcome::Requeued {
                    error: format!("provisioning failed: {err}"),
                })
            }
            Err(_elapsed) => {
                warn!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job.job_id,
                    budget_secs = budget.as_secs(),
                    "provisioning timed out"
                );
                Err(JobOutcome::Requeued {
                    error: format!("provisioning timed out after {budget:?}"),
                })
            }
        }
    }

    /// Generate, upload, and run the script with both watchdogs armed.
    #[allow(clippy::too_many_arguments)]
    async fn run_build(
        &self,
        job: &BuildJob,
        instance: &dyn Instance,
        work: &CancellationToken,
        registration: &CancelRegistration,
        job_started: Instant,
        hard_timeout: Duration,
        log_timeout: Duration,
    ) -> JobOutcome {
        let config = &self.state.config;

        let script = match self.state.script_generator.generate(job).await {
            Ok(script) => script,
            Err(err) => {
                return JobOutcome::Requeued {
                    error: format!("script generation failed: {err}"),
                };
            }
        };

        let uploaded = tokio::time::timeout(
            config.script_upload_timeout(),
            instance.upload_script(work, &script),
        )
        .await;
        match uploaded {
            Ok(Ok(())) => {}
            Ok(Err(crane_provider::Error::Cancelled)) => {
                return self.interrupted_outcome(registration);
            }
            Ok(Err(err)) => {
                return JobOutcome::Requeued {
                    error: format!("script upload failed: {err}"),
                };
            }
            Err(_elapsed) => {
                return JobOutcome::Requeued {
                    error: "script upload timed out".to_string(),
                };
            }
        }

        let sink = self.state.logs.sink_for(job.job_id);
        let logger = JobLogger::new(sink);

        // The executor gets its own child token so a watchdog can cut the
        // run without tearing down the work context semantics.
        let run_token = work.child_token();
        let run_fut = instance.run_script(&run_token, &logger);
        tokio::pin!(run_fut);

        let hard_sleep = tokio::time::sleep(hard_timeout.saturating_sub(job_started.elapsed()));
        tokio::pin!(hard_sleep);

        let (cut, result) = tokio::select! {
            biased;

            () = work.cancelled() => {
                run_token.cancel();
                let cut = if self.hard_stop.is_cancelled() {
                    Cut::Stopped
                } else {
                    Cut::Cancelled
                };
                (Some(cut), (&mut run_fut).await)
            }

            () = &mut hard_sleep => {
                run_token.cancel();
                (Some(Cut::HardTimeout), (&mut run_fut).await)
            }

            () = silence(&logger, log_timeout) => {
                run_token.cancel();
                (Some(Cut::Stalled), (&mut run_fut).await)
            }

            result = &mut run_fut => (None, result),
        };

        if let Some(cut) = cut
            && let Err(err) = &result
        {
            debug!(
                target: TRACING_TARGET_PROCESSOR,
                job_id = %job.job_id,
                cut = ?cut,
                error = %err,
                "executor returned an error after the run was cut"
            );
        }

        match (cut, result) {
            (None, Ok(res)) if res.completed => JobOutcome::Finished {
                exit_code: res.exit_code.unwrap_or(-1),
            },
            (None, Ok(_incomplete)) => JobOutcome::Requeued {
                error: "script execution ended without completing".to_string(),
            },
            (None, Err(err)) => JobOutcome::Requeued {
                error: format!("script execution failed: {err}"),
            },
            (Some(Cut::Cancelled), _) => JobOutcome::Cancelled {
                reason: registration.cancel_reason(),
            },
            (Some(Cut::HardTimeout), _) => JobOutcome::TimedOut,
            (Some(Cut::Stalled), _) => JobOutcome::Stalled,
            (Some(Cut::Stopped), _) => JobOutcome::Requeued {
                error: "worker stopped mid-run".to_string(),
            },
        }
    }

    /// Outcome for a work-context interruption outside the run phase.
    fn interrupted_outcome(&self, registration: &CancelRegistration) -> JobOutcome {
        if self.hard_stop.is_cancelled() {
            JobOutcome::Requeued {
                error: "worker stopped".to_string(),
            }
        } else {
            JobOutcome::Cancelled {
                reason: registration.cancel_reason(),
            }
        }
    }

    /// Tear the instance down under a fresh context.
    ///
    /// Retried on a fixed interval; exhaustion is escalated as a leak but
    /// never blocks settling the delivery — the job's result is already
    /// decided.
    async fn stop_instance(&self, job_id: Uuid, instance: &dyn Instance) {
        let config = &self.state.config;

        // Cleanup context: derived only from the pool's hard stop, never
        // from the possibly-cancelled work context.
        let cleanup = self.hard_stop.child_token();
        let retry = RetryConfig::new(config.stop_retries, config.stop_interval());

        let stop_token = cleanup.clone();
        let result = retry
            .run(&cleanup, move |attempt| {
                let token = stop_token.clone();
                async move {
                    debug!(
                        target: TRACING_TARGET_PROCESSOR,
                        attempt = attempt,
                        "stopping instance"
                    );
                    instance.stop(&token).await
                }
            })
            .await;

        match result {
            Ok(()) => {
                info!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job_id,
                    instance_id = instance.id(),
                    "instance stopped"
                );
            }
            Err(crane_provider::Error::Cancelled) => {
                warn!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job_id,
                    instance_id = instance.id(),
                    "teardown aborted by hard stop, instance may leak"
                );
                metrics::incr(metrics::INSTANCE_LEAK);
            }
            Err(err) => {
                error!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job_id,
                    instance_id = instance.id(),
                    retries = config.stop_retries,
                    error = %err,
                    "instance teardown failed, possible resource leak"
                );
                metrics::incr(metrics::INSTANCE_LEAK);
            }
        }
    }

    /// Emit metrics and settle the delivery according to the outcome.
    async fn finish(&self, job: &BuildJob, outcome: JobOutcome, handle: Box<dyn JobHandle>) {
        match &outcome {
            JobOutcome::Finished { exit_code } => {
                metrics::incr(metrics::JOB_FINISHED);
                if *exit_code == 0 {
                    metrics::incr(metrics::JOB_SUCCESS);
                }
                info!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job.job_id,
                    exit_code = exit_code,
                    status = outcome.status(),
                    "job finished"
                );
            }
            JobOutcome::Cancelled { reason } => {
                metrics::incr(metrics::JOB_CANCELLED);
                info!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job.job_id,
                    reason = reason.as_deref().unwrap_or("none"),
                    status = outcome.status(),
                    "job cancelled"
                );
            }
            JobOutcome::TimedOut => {
                metrics::incr(metrics::JOB_TIMED_OUT);
                warn!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job.job_id,
                    status = outcome.status(),
                    "job hit hard timeout"
                );
            }
            JobOutcome::Stalled => {
                metrics::incr(metrics::JOB_STALLED);
                warn!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job.job_id,
                    status = outcome.status(),
                    "job stalled, no output within log timeout"
                );
            }
            JobOutcome::Requeued { error } => {
                metrics::incr(metrics::JOB_REQUEUE);
                warn!(
                    target: TRACING_TARGET_PROCESSOR,
                    job_id = %job.job_id,
                    error = %error,
                    status = outcome.status(),
                    "returning job to the queue"
                );
            }
        }

        let settled = if outcome.requeues() {
            handle.nack(true).await
        } else {
            handle.ack().await
        };

        if let Err(err) = settled {
            // The broker redelivers after its ack deadline; nothing more to
            // do on this side.
            error!(
                target: TRACING_TARGET_PROCESSOR,
                job_id = %job.job_id,
                error = %err,
                "failed to settle delivery"
            );
        }
    }
}

/// Resolves when the logger has been idle longer than `log_timeout`.
async fn silence(logger: &JobLogger, log_timeout: Duration) {
    loop {
        let idle = logger.idle_for();
        if idle >= log_timeout {
            return;
        }
        tokio::time::sleep(log_timeout - idle).await;
    }
}

struct TraceProgress {
    job_id: Uuid,
}

impl Progress for TraceProgress {
    fn report(&self, progress: BootProgress) {
        debug!(
            target: TRACING_TARGET_PROCESSOR,
            job_id = %self.job_id,
            progress = ?progress,
            "boot progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(ProcessorState::Idle.as_str(), "idle");
        assert_eq!(ProcessorState::Provisioning.to_string(), "provisioning");
        assert_eq!(ProcessorState::Stopping.as_str(), "stopping");
    }

    #[test]
    fn outcome_classification() {
        assert!(!JobOutcome::Finished { exit_code: 1 }.requeues());
        assert!(!JobOutcome::Cancelled { reason: None }.requeues());
        assert!(!JobOutcome::TimedOut.requeues());
        assert!(!JobOutcome::Stalled.requeues());
        assert!(
            JobOutcome::Requeued {
                error: "boom".to_string()
            }
            .requeues()
        );

        assert_eq!(JobOutcome::TimedOut.status(), "timed_out");
        assert_eq!(JobOutcome::Stalled.status(), "stalled");
    }
}
