//! Worker configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

/// Default number of processors in the pool.
pub const DEFAULT_POOL_SIZE: usize = 2;
/// Default queue name jobs are consumed from.
pub const DEFAULT_QUEUE_NAME: &str = "builds";
/// Default provider backend.
pub const DEFAULT_PROVIDER_NAME: &str = "local";
/// Default hard timeout, measured from job start.
pub const DEFAULT_HARD_TIMEOUT_SECS: u64 = 3000;
/// Default log-silence timeout.
pub const DEFAULT_LOG_TIMEOUT_SECS: u64 = 600;
/// Default script upload budget.
pub const DEFAULT_SCRIPT_UPLOAD_TIMEOUT_SECS: u64 = 60;
/// Default provisioning budget.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 240;
/// Default teardown retry budget.
pub const DEFAULT_STOP_RETRIES: u32 = 3;
/// Default fixed interval between teardown retries.
pub const DEFAULT_STOP_INTERVAL_SECS: u64 = 5;
/// Default graceful-shutdown drain budget.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 3600;

/// Complete worker configuration.
///
/// Every option can be supplied through the process environment; the env
/// names below are the configuration surface of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct WorkerConfig {
    /// Number of processors the pool runs.
    #[cfg_attr(
        feature = "config",
        arg(long = "pool-size", env = "POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)
    )]
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Queue jobs are consumed from.
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-name", env = "QUEUE_NAME", default_value = DEFAULT_QUEUE_NAME)
    )]
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Provider backend jobs are provisioned with.
    #[cfg_attr(
        feature = "config",
        arg(long = "provider-name", env = "PROVIDER_NAME", default_value = DEFAULT_PROVIDER_NAME)
    )]
    #[serde(default = "default_provider_name")]
    pub provider_name: String,

    /// Maximum wall time for one job, in seconds, measured from job start.
    #[cfg_attr(
        feature = "config",
        arg(long = "hard-timeout", env = "HARD_TIMEOUT", default_value_t = DEFAULT_HARD_TIMEOUT_SECS)
    )]
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,

    /// Maximum gap between output bytes, in seconds, before a job is
    /// declared stalled.
    #[cfg_attr(
        feature = "config",
        arg(long = "log-timeout", env = "LOG_TIMEOUT", default_value_t = DEFAULT_LOG_TIMEOUT_SECS)
    )]
    #[serde(default = "default_log_timeout_secs")]
    pub log_timeout_secs: u64,

    /// Budget for installing the build script on an instance, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "script-upload-timeout",
            env = "SCRIPT_UPLOAD_TIMEOUT",
            default_value_t = DEFAULT_SCRIPT_UPLOAD_TIMEOUT_SECS
        )
    )]
    #[serde(default = "default_script_upload_timeout_secs")]
    pub script_upload_timeout_secs: u64,

    /// Budget for provisioning an instance, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "startup-timeout",
            env = "STARTUP_TIMEOUT",
            default_value_t = DEFAULT_STARTUP_TIMEOUT_SECS
        )
    )]
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Teardown retry budget per instance.
    #[cfg_attr(
        feature = "config",
        arg(long = "stop-retries", env = "STOP_RETRIES", default_value_t = DEFAULT_STOP_RETRIES)
    )]
    #[serde(default = "default_stop_retries")]
    pub stop_retries: u32,

    /// Fixed interval between teardown retries, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "stop-interval",
            env = "STOP_INTERVAL",
            default_value_t = DEFAULT_STOP_INTERVAL_SECS
        )
    )]
    #[serde(default = "default_stop_interval_secs")]
    pub stop_interval_secs: u64,

    /// How long graceful shutdown waits for in-flight jobs, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "shutdown-timeout",
            env = "SHUTDOWN_TIMEOUT",
            default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS
        )
    )]
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Build-script generator endpoint; jobs carry inline scripts when unset.
    #[cfg_attr(
        feature = "config",
        arg(long = "script-generator-url", env = "SCRIPT_GENERATOR_URL")
    )]
    #[serde(default)]
    pub script_generator_url: Option<String>,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}
fn default_queue_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}
fn default_provider_name() -> String {
    DEFAULT_PROVIDER_NAME.to_string()
}
fn default_hard_timeout_secs() -> u64 {
    DEFAULT_HARD_TIMEOUT_SECS
}
fn default_log_timeout_secs() -> u64 {
    DEFAULT_LOG_TIMEOUT_SECS
}
fn default_script_upload_timeout_secs() -> u64 {
    DEFAULT_SCRIPT_UPLOAD_TIMEOUT_SECS
}
fn default_startup_timeout_secs() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_SECS
}
fn default_stop_retries() -> u32 {
    DEFAULT_STOP_RETRIES
}
fn default_stop_interval_secs() -> u64 {
    DEFAULT_STOP_INTERVAL_SECS
}
fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            provider_name: DEFAULT_PROVIDER_NAME.to_string(),
            hard_timeout_secs: DEFAULT_HARD_TIMEOUT_SECS,
            log_timeout_secs: DEFAULT_LOG_TIMEOUT_SECS,
            script_upload_timeout_secs: DEFAULT_SCRIPT_UPLOAD_TIMEOUT_SECS,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
            stop_retries: DEFAULT_STOP_RETRIES,
            stop_interval_secs: DEFAULT_STOP_INTERVAL_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            script_generator_url: None,
        }
    }
}

impl WorkerConfig {
    /// Effective hard timeout.
    #[inline]
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }

    /// Effective log-silence timeout.
    #[inline]
    pub fn log_timeout(&self) -> Duration {
        Duration::from_secs(self.log_timeout_secs)
    }

    /// Effective script upload budget.
    #[inline]
    pub fn script_upload_timeout(&self) -> Duration {
        Duration::from_secs(self.script_upload_timeout_secs)
    }

    /// Effective provisioning budget.
    #[inline]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Fixed interval between teardown retries.
    #[inline]
    pub fn stop_interval(&self) -> Duration {
        Duration::from_secs(self.stop_interval_secs)
    }

    /// Graceful-shutdown drain budget.
    #[inline]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool size must be at least 1".to_string());
        }
        if self.queue_name.is_empty() {
            return Err("queue name cannot be empty".to_string());
        }
        if self.provider_name.is_empty() {
            return Err("provider name cannot be empty".to_string());
        }
        if self.hard_timeout_secs == 0 {
            return Err("hard timeout must be positive".to_string());
        }
        if self.log_timeout_secs == 0 {
            return Err("log timeout must be positive".to_string());
        }
        Ok(())
    }

    /// Set the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the hard timeout in seconds.
    #[must_use]
    pub fn with_hard_timeout_secs(mut self, secs: u64) -> Self {
        self.hard_timeout_secs = secs;
        self
    }

    /// Set the log-silence timeout in seconds.
    #[must_use]
    pub fn with_log_timeout_secs(mut self, secs: u64) -> Self {
        self.log_timeout_secs = secs;
        self
    }

    /// Set the shutdown drain budget in seconds.
    #[must_use]
    pub fn with_shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }
}
