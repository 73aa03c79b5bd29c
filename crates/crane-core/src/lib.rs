#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
pub mod job;
pub mod queue;

pub use error::{Error, Result};
pub use job::{BuildJob, ImageSelector, JobTimeouts, Repository};
pub use queue::{JobDelivery, JobFeed, JobHandle, JobSource};
