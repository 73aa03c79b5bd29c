#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod backend;
mod config;
mod error;
mod instance;
mod provider;
mod registry;
mod retry;

// Tracing target constants for consistent logging
pub const TRACING_TARGET_PROVIDER: &str = "crane_provider::provider";
pub const TRACING_TARGET_RETRY: &str = "crane_provider::retry";

pub use config::{ConfigOption, ProviderConfig};
pub use error::{Error, Result};
pub use instance::{Instance, LogSink, RunResult};
pub use provider::{BootProgress, NoProgress, Progress, Provider, StartAttributes};
pub use registry::{ProviderDescriptor, ProviderRegistry};
pub use retry::RetryConfig;
