//! CLI configuration management.
//!
//! The configuration surface is a flat string-keyed mapping, conventionally
//! from the process environment:
//!
//! ```text
//! Cli
//! ├── worker: WorkerConfig   # POOL_SIZE, QUEUE_NAME, PROVIDER_NAME, timeouts
//! └── nats:   BrokerConfig   # NATS_URL, NATS_TOKEN, connection tuning
//! ```
//!
//! Backend-specific options ride `PROVIDER_CONFIG_*` variables and reach the
//! chosen backend as a [`ProviderConfig`]; keys the backend does not declare
//! are surfaced as warnings.
//!
//! # Example
//!
//! ```bash
//! # Two processors on the linux queue, against a local NATS
//! POOL_SIZE=2 QUEUE_NAME=linux PROVIDER_NAME=local crane-cli
//!
//! # Or via CLI arguments
//! crane-cli --pool-size 2 --queue-name linux --provider-name local
//! ```

use std::process;

use anyhow::Context;
use clap::Parser;
use crane_nats::BrokerConfig;
use crane_provider::ProviderConfig;
use crane_worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Prefix backend options are scraped from the environment with.
pub const PROVIDER_CONFIG_PREFIX: &str = "PROVIDER_CONFIG_";

/// Complete CLI configuration.
///
/// Combines all configuration groups for the worker daemon:
/// - [`WorkerConfig`]: pool size, queue, provider choice, job timeouts
/// - [`BrokerConfig`]: broker connection
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "crane")]
#[command(about = "Crane distributed CI build worker")]
#[command(version)]
pub struct Cli {
    /// Worker pool and job lifecycle configuration.
    #[clap(flatten)]
    pub worker: WorkerConfig,

    /// Broker connection configuration.
    #[clap(flatten)]
    pub nats: BrokerConfig,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses
    /// CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is
    /// enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.worker
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid worker configuration")?;
        self.nats
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid broker configuration")?;
        Ok(())
    }

    /// Logs configuration at startup (no sensitive information).
    pub fn log(&self) {
        Self::log_build_info();

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            pool_size = self.worker.pool_size,
            queue = %self.worker.queue_name,
            provider = %self.worker.provider_name,
            hard_timeout_secs = self.worker.hard_timeout_secs,
            log_timeout_secs = self.worker.log_timeout_secs,
            script_upload_timeout_secs = self.worker.script_upload_timeout_secs,
            startup_timeout_secs = self.worker.startup_timeout_secs,
            shutdown_timeout_secs = self.worker.shutdown_timeout_secs,
            script_generator = self.worker.script_generator_url.as_deref().unwrap_or("inline"),
            "worker configuration"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            nats_url = %self.nats.url,
            connection_name = self.nats.connection_name(),
            "broker configuration"
        );
    }

    /// Logs build information at debug level.
    fn log_build_info() {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            "build information"
        );
    }
}

/// Scrapes backend options from `PROVIDER_CONFIG_*` environment variables.
pub fn provider_config_from_env() -> ProviderConfig {
    ProviderConfig::from_env(PROVIDER_CONFIG_PREFIX)
}
