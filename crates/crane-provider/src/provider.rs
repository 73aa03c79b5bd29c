//! The provider contract backends implement.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Result;
use crate::instance::Instance;

/// What a job asks of the backend when an instance is provisioned.
#[derive(Debug, Clone, Default)]
pub struct StartAttributes {
    /// Job the instance is provisioned for.
    pub job_id: Uuid,
    /// Requested image name, if the job names one.
    pub image_name: Option<String>,
    /// Requested image group, for backends that rotate within a group.
    pub image_group: Option<String>,
    /// Build language hint.
    pub language: Option<String>,
}

impl StartAttributes {
    /// Attributes for a job with no image preferences.
    pub fn for_job(job_id: Uuid) -> Self {
        Self {
            job_id,
            ..Default::default()
        }
    }
}

/// Provisioning progress, for backends that can narrate their boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootProgress {
    /// The instance was requested from the backend.
    Requested,
    /// Still waiting for the instance to accept work.
    Waiting { elapsed: Duration },
    /// The instance accepted work.
    Ready,
}

/// Receiver for [`BootProgress`] updates. Reports are fire-and-forget.
pub trait Progress: Send + Sync {
    fn report(&self, progress: BootProgress);
}

/// A [`Progress`] receiver that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _progress: BootProgress) {}
}

/// A backend that can provision instances for build jobs.
///
/// `start` must self-clean: when it returns an error, no resources remain
/// allocated, and the caller will never issue a matching `stop`.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Short registry name of the backend.
    fn name(&self) -> &'static str;

    /// One-shot initialization; failure is fatal for the daemon.
    async fn setup(&self, cancel: &CancellationToken) -> Result<()>;

    /// Provision an instance and wait until it accepts work.
    async fn start(
        &self,
        cancel: &CancellationToken,
        attrs: &StartAttributes,
    ) -> Result<Box<dyn Instance>>;

    /// Whether [`start_with_progress`](Provider::start_with_progress)
    /// reports anything beyond the default.
    fn supports_progress(&self) -> bool {
        false
    }

    /// Provision with boot-progress reporting; the default ignores the
    /// receiver and delegates to [`start`](Provider::start).
    async fn start_with_progress(
        &self,
        cancel: &CancellationToken,
        attrs: &StartAttributes,
        progress: &dyn Progress,
    ) -> Result<Box<dyn Instance>> {
        let _ = progress;
        self.start(cancel, attrs).await
    }
}
