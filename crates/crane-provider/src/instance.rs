//! The instance contract backends implement.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Outcome of running a build script to the end.
///
/// A non-zero exit is still a *completed* run: the script made its own
/// decision. `completed == false` means execution was cut short (cancel,
/// timeout, infrastructure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    /// Whether the script ran to a normal exit.
    pub completed: bool,
    /// Script exit code, present when `completed`.
    pub exit_code: Option<i32>,
}

impl RunResult {
    /// A run that reached a normal exit with the given code.
    pub fn completed(exit_code: i32) -> Self {
        Self {
            completed: true,
            exit_code: Some(exit_code),
        }
    }

    /// A run cut short before the script could exit.
    pub fn incomplete() -> Self {
        Self {
            completed: false,
            exit_code: None,
        }
    }

    /// Whether the script completed with exit code zero.
    pub fn success(&self) -> bool {
        self.completed && self.exit_code == Some(0)
    }
}

/// Receiver for live build output.
///
/// Writes must be cheap and must never block the producing instance on a
/// slow downstream; implementations buffer or drop as they see fit.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver one chunk of output as it was produced.
    async fn write(&self, chunk: &[u8]) -> std::io::Result<()>;
}

/// A live machine provisioned for exactly one job.
///
/// Exists strictly between a successful `Provider::start` and a successful
/// [`stop`](Instance::stop); every start must be matched by exactly one
/// stop no matter how execution ends.
#[async_trait]
pub trait Instance: Send + Sync + std::fmt::Debug {
    /// Install the build script on the instance.
    async fn upload_script(&self, cancel: &CancellationToken, script: &[u8]) -> Result<()>;

    /// Execute the uploaded script, streaming output to `sink` as it
    /// arrives. Cancelling `cancel` must kill the remote process and return
    /// promptly with an incomplete result.
    async fn run_script(&self, cancel: &CancellationToken, sink: &dyn LogSink)
    -> Result<RunResult>;

    /// Fetch the build trace, for backends that record one.
    async fn download_trace(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let _ = cancel;
        Err(Error::NotImplemented {
            operation: "download_trace",
        })
    }

    /// Destroy the machine and every side resource. Idempotent: repeated
    /// calls converge on "gone".
    async fn stop(&self, cancel: &CancellationToken) -> Result<()>;

    /// Backend-assigned instance identifier.
    fn id(&self) -> &str;

    /// Name of the image the instance booted from.
    fn image_name(&self) -> &str;

    /// How long provisioning took until the instance accepted work.
    fn startup_duration(&self) -> Duration;

    /// Whether the instance came from a pre-warmed pool.
    fn warmed(&self) -> bool {
        false
    }
}
