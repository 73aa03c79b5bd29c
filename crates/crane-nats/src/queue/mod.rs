//! Work-queue stream for build jobs.

mod delivery;
#[allow(clippy::module_inception)]
mod queue;

pub use delivery::NatsDelivery;
pub use queue::{JobQueue, JobStream};
