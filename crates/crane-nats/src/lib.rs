#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

//! Task-focused NATS client for the Crane build worker.
//!
//! This crate provides the broker side of the worker with specialized modules for:
//! - **Client**: Connection management and configuration
//! - **Queue**: The work-queue stream build jobs are consumed from
//! - **Command**: The control subject carrying job-cancellation commands
//! - **Logs**: Per-job subjects that build output is streamed to
//!
//! Durability lives in the broker: the worker itself persists nothing, and a
//! delivery leaves the queue only through an explicit ack or nack.

// Tracing target constants for consistent logging
pub const TRACING_TARGET_CLIENT: &str = "crane_nats::client";
pub const TRACING_TARGET_QUEUE: &str = "crane_nats::queue";
pub const TRACING_TARGET_COMMAND: &str = "crane_nats::command";
pub const TRACING_TARGET_CONNECTION: &str = "crane_nats::connection";
pub const TRACING_TARGET_LOGS: &str = "crane_nats::logs";

pub mod client;
pub mod command;
mod error;
pub mod logs;
pub mod queue;

// Re-export key types
pub use async_nats::Error as NatsError;
pub use client::{BrokerClient, BrokerConfig};
pub use command::{CommandPublisher, CommandSubscriber, ControlCommand};
pub use error::{Error, Result};
pub use logs::LogPublisher;
pub use queue::{JobQueue, JobStream, NatsDelivery};
