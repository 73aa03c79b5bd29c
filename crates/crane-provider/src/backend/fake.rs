//! Deterministic in-memory backend.
//!
//! Boots instantly (or after a configured delay), produces scripted output,
//! and injects failures on demand. The scenario suites drive the whole job
//! lifecycle through this backend; it is also handy for smoke-testing a
//! deployment without touching a real provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigOption, ProviderConfig};
use crate::instance::{Instance, LogSink, RunResult};
use crate::provider::{BootProgress, Progress, Provider, StartAttributes};
use crate::registry::ProviderDescriptor;
use crate::retry::RetryConfig;
use crate::{Error, Result};

const DEFAULT_RETRY: RetryConfig = RetryConfig {
    max_attempts: 3,
    interval: Duration::from_millis(10),
};

/// Options the fake backend recognizes.
pub const OPTIONS: &[ConfigOption] = &[
    ConfigOption {
        key: "boot_delay_ms",
        purpose: "simulated provisioning delay before the instance is ready",
    },
    ConfigOption {
        key: "run_delay_ms",
        purpose: "simulated script runtime after output is emitted",
    },
    ConfigOption {
        key: "log_output",
        purpose: "output every script run emits",
    },
    ConfigOption {
        key: "exit_code",
        purpose: "exit code every script run completes with",
    },
    ConfigOption {
        key: "fail_start",
        purpose: "make every provisioning attempt fail",
    },
    ConfigOption {
        key: "api_fail_attempts",
        purpose: "number of simulated API calls that fail before one succeeds",
    },
    ConfigOption {
        key: "api_retries",
        purpose: "retry budget for simulated API calls",
    },
    ConfigOption {
        key: "api_interval_ms",
        purpose: "fixed interval between simulated API retries",
    },
    ConfigOption {
        key: "probe_fail_attempts",
        purpose: "number of readiness probes that fail before one succeeds",
    },
    ConfigOption {
        key: "probe_retries",
        purpose: "retry budget for readiness probes",
    },
    ConfigOption {
        key: "probe_interval_ms",
        purpose: "fixed interval between readiness probes",
    },
    ConfigOption {
        key: "stop_fail_attempts",
        purpose: "number of stop calls per instance that fail before one succeeds",
    },
];

/// Registry descriptor for the fake backend.
pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new("fake", "Fake (in-memory)", OPTIONS, |config| {
        Ok(Arc::new(FakeProvider::from_config(config)?))
    })
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicUsize,
    stopped: AtomicUsize,
    api_calls: AtomicU32,
    probe_calls: AtomicU32,
}

/// Deterministic backend with failure injection.
#[derive(Debug)]
pub struct FakeProvider {
    boot_delay: Duration,
    run_delay: Duration,
    log_output: Vec<u8>,
    exit_code: i32,
    fail_start: bool,
    api_fail_attempts: u32,
    api_retry: RetryConfig,
    probe_fail_attempts: u32,
    probe_retry: RetryConfig,
    stop_fail_attempts: u32,
    counters: Arc<Counters>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    /// A backend that boots instantly and completes every script with exit 0.
    pub fn new() -> Self {
        Self {
            boot_delay: Duration::ZERO,
            run_delay: Duration::ZERO,
            log_output: b"ok\n".to_vec(),
            exit_code: 0,
            fail_start: false,
            api_fail_attempts: 0,
            api_retry: DEFAULT_RETRY,
            probe_fail_attempts: 0,
            probe_retry: DEFAULT_RETRY,
            stop_fail_attempts: 0,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Build the backend from its flat configuration.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut provider = Self::new();

        if let Some(delay) = config.get_duration_ms("boot_delay_ms")? {
            provider.boot_delay = delay;
        }
        if let Some(delay) = config.get_duration_ms("run_delay_ms")? {
            provider.run_delay = delay;
        }
        if let Some(output) = config.get("log_output") {
            provider.log_output = output.as_bytes().to_vec();
        }
        if let Some(code) = config.get_u32("exit_code")? {
            provider.exit_code = code as i32;
        }
        if let Some(fail) = config.get_bool("fail_start")? {
            provider.fail_start = fail;
        }
        if let Some(attempts) = config.get_u32("api_fail_attempts")? {
            provider.api_fail_attempts = attempts;
        }
        if let Some(retries) = config.get_u32("api_retries")? {
            provider.api_retry.max_attempts = retries;
        }
        if let Some(interval) = config.get_duration_ms("api_interval_ms")? {
            provider.api_retry.interval = interval;
        }
        if let Some(attempts) = config.get_u32("probe_fail_attempts")? {
            provider.probe_fail_attempts = attempts;
        }
        if let Some(retries) = config.get_u32("probe_retries")? {
            provider.probe_retry.max_attempts = retries;
        }
        if let Some(interval) = config.get_duration_ms("probe_interval_ms")? {
            provider.probe_retry.interval = interval;
        }
        if let Some(attempts) = config.get_u32("stop_fail_attempts")? {
            provider.stop_fail_attempts = attempts;
        }

        Ok(provider)
    }

    /// Set the simulated provisioning delay.
    #[must_use]
    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    /// Set the simulated script runtime after output is emitted.
    #[must_use]
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Set the output every script run emits.
    #[must_use]
    pub fn with_log_output(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.log_output = output.into();
        self
    }

    /// Set the exit code every script run completes with.
    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Make every provisioning attempt fail.
    #[must_use]
    pub fn with_fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail the first `attempts` simulated API calls.
    #[must_use]
    pub fn with_api_fail_attempts(mut self, attempts: u32, retry: RetryConfig) -> Self {
        self.api_fail_attempts = attempts;
        self.api_retry = retry;
        self
    }

    /// Fail the first `attempts` readiness probes.
    #[must_use]
    pub fn with_probe_fail_attempts(mut self, attempts: u32, retry: RetryConfig) -> Self {
        self.probe_fail_attempts = attempts;
        self.probe_retry = retry;
        self
    }

    /// Fail the first `attempts` stop calls on every instance.
    #[must_use]
    pub fn with_stop_fail_attempts(mut self, attempts: u32) -> Self {
        self.stop_fail_attempts = attempts;
        self
    }

    /// Number of instances successfully started.
    pub fn started_count(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    /// Number of instances successfully stopped.
    pub fn stopped_count(&self) -> usize {
        self.counters.stopped.load(Ordering::SeqCst)
    }

    /// Number of instances started but not yet stopped.
    pub fn live_count(&self) -> usize {
        self.started_count().saturating_sub(self.stopped_count())
    }

    /// Total simulated API calls made.
    pub fn api_call_count(&self) -> u32 {
        self.counters.api_calls.load(Ordering::SeqCst)
    }

    /// Total readiness probes made.
    pub fn probe_call_count(&self) -> u32 {
        self.counters.probe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn setup(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn start(
        &self,
        cancel: &CancellationToken,
        attrs: &StartAttributes,
    ) -> Result<Box<dyn Instance>> {
        if self.fail_start {
            return Err(Error::start("synthetic provisioning failure"));
        }

        let boot_started = Instant::now();

        // The create call and the readiness probe run on separate budgets:
        // "running" according to the API does not imply "reachable".
        let counters = Arc::clone(&self.counters);
        let api_fail_attempts = self.api_fail_attempts;
        let api_interval = self.api_retry.interval;
        self.api_retry
            .run(cancel, move |_attempt| {
                let counters = Arc::clone(&counters);
                async move {
                    let calls = counters.api_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if calls <= api_fail_attempts {
                        Err(Error::timeout(api_interval))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::start(format!("create call failed: {other}")),
            })?;

        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(self.boot_delay) => {}
        }

        let counters = Arc::clone(&self.counters);
        let probe_fail_attempts = self.probe_fail_attempts;
        let probe_interval = self.probe_retry.interval;
        self.probe_retry
            .run(cancel, move |_attempt| {
                let counters = Arc::clone(&counters);
                async move {
                    let calls = counters.probe_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if calls <= probe_fail_attempts {
                        Err(Error::timeout(probe_interval))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::start(format!("readiness probe failed: {other}")),
            })?;

        let ordinal = self.counters.started.fetch_add(1, Ordering::SeqCst) + 1;
        let image = attrs
            .image_name
            .clone()
            .unwrap_or_else(|| "fake-default".to_string());

        Ok(Box::new(FakeInstance {
            id: format!("fake-{ordinal}"),
            image,
            startup: boot_started.elapsed(),
            run_delay: self.run_delay,
            log_output: self.log_output.clone(),
            exit_code: self.exit_code,
            stop_fail_remaining: AtomicU32::new(self.stop_fail_attempts),
            stopped: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn supports_progress(&self) -> bool {
        true
    }

    async fn start_with_progress(
        &self,
        cancel: &CancellationToken,
        attrs: &StartAttributes,
        progress: &dyn Progress,
    ) -> Result<Box<dyn Instance>> {
        progress.report(BootProgress::Requested);
        let instance = self.start(cancel, attrs).await?;
        progress.report(BootProgress::Ready);
        Ok(instance)
    }
}

/// One fake instance.
#[derive(Debug)]
pub struct FakeInstance {
    id: String,
    image: String,
    startup: Duration,
    run_delay: Duration,
    log_output: Vec<u8>,
    exit_code: i32,
    stop_fail_remaining: AtomicU32,
    stopped: AtomicBool,
    counters: Arc<Counters>,
}

#[async_trait]
impl Instance for FakeInstance {
    async fn upload_script(&self, cancel: &CancellationToken, _script: &[u8]) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn run_script(
        &self,
        cancel: &CancellationToken,
        sink: &dyn LogSink,
    ) -> Result<RunResult> {
        if cancel.is_cancelled() {
            return Ok(RunResult::incomplete());
        }

        if !self.log_output.is_empty() {
            sink.write(&self.log_output)
                .await
                .map_err(|e| Error::run(format!("streaming output: {e}")))?;
        }

        tokio::select! {
            () = cancel.cancelled() => Ok(RunResult::incomplete()),
            () = tokio::time::sleep(self.run_delay) => Ok(RunResult::completed(self.exit_code)),
        }
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<()> {
        let remaining = self.stop_fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.stop_fail_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::stop(1, "synthetic stop failure"));
        }

        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn image_name(&self) -> &str {
        &self.image
    }

    fn startup_duration(&self) -> Duration {
        self.startup
    }

    fn warmed(&self) -> bool {
        self.startup < Duration::from_millis(1)
    }
}
