#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging
pub const TRACING_TARGET_POOL: &str = "crane_worker::pool";
pub const TRACING_TARGET_PROCESSOR: &str = "crane_worker::processor";
pub const TRACING_TARGET_DISPATCH: &str = "crane_worker::dispatch";
pub const TRACING_TARGET_SCRIPT: &str = "crane_worker::script";
pub const TRACING_TARGET_LOGS: &str = "crane_worker::logs";

mod config;
pub mod dispatch;
mod error;
pub mod logs;
pub mod metrics;
pub mod pool;
pub mod processor;
pub mod script;
mod state;

pub use config::WorkerConfig;
pub use dispatch::{CancelRegistration, CommandDispatcher};
pub use error::{Result, WorkerError};
pub use logs::{BrokerBuildLogs, BuildLogs, JobLogger};
pub use pool::{PoolHandle, ProcessorPool};
pub use processor::{JobOutcome, Processor, ProcessorState};
pub use script::{HttpScriptGenerator, InlineScriptGenerator, ScriptGenerator};
pub use state::WorkerState;
