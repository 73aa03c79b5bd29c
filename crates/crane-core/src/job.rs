//! Build job payload delivered by the broker.

use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Build job delivered by the broker.
///
/// The schema is broker-defined; fields this worker does not recognize are
/// preserved in [`extra`](Self::extra) and travel with the job untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    /// Unique, stable job identifier.
    pub job_id: Uuid,
    /// Source repository the build runs against.
    pub repository: Repository,
    /// Build language/toolchain hint for image selection and script generation.
    #[serde(default)]
    pub language: Option<String>,
    /// Opaque build inputs consumed by the script generator.
    #[serde(default)]
    pub script: Value,
    /// Per-job timeout overrides; daemon defaults apply where unset.
    #[serde(default)]
    pub timeouts: JobTimeouts,
    /// Machine image the job asks for.
    #[serde(default)]
    pub image: ImageSelector,
    /// When the job entered the queue.
    #[serde(default)]
    pub queued_at: Option<Timestamp>,
    /// Unknown fields, passed through opaquely.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BuildJob {
    /// Create a new job for the given repository.
    pub fn new(repository: Repository) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            repository,
            language: None,
            script: Value::Null,
            timeouts: JobTimeouts::default(),
            image: ImageSelector::default(),
            queued_at: Some(Timestamp::now()),
            extra: Map::new(),
        }
    }

    /// Set the language hint.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the opaque script inputs.
    pub fn with_script(mut self, script: Value) -> Self {
        self.script = script;
        self
    }

    /// Set the per-job timeout overrides.
    pub fn with_timeouts(mut self, timeouts: JobTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the image selector.
    pub fn with_image(mut self, image: ImageSelector) -> Self {
        self.image = image;
        self
    }
}

/// Source repository coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository slug, e.g. `crane-build/worker`.
    pub slug: String,
    /// Commit to build.
    pub commit: String,
    /// Branch the commit was pushed to, if any.
    #[serde(default)]
    pub branch: Option<String>,
}

impl Repository {
    /// Create repository coordinates for a slug and commit.
    pub fn new(slug: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            commit: commit.into(),
            branch: None,
        }
    }

    /// Set the branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Machine image requested by a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSelector {
    /// Image name understood by the provider backend.
    #[serde(default)]
    pub name: Option<String>,
    /// Image group/pool, for backends that rotate images within a group.
    #[serde(default)]
    pub group: Option<String>,
}

/// Per-job timeout overrides, in seconds.
///
/// `None` means the daemon-wide default applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTimeouts {
    /// Maximum wall time from job start.
    #[serde(default)]
    pub hard_secs: Option<u64>,
    /// Maximum gap between output bytes before the job is declared stalled.
    #[serde(default)]
    pub log_silence_secs: Option<u64>,
}

impl JobTimeouts {
    /// Effective hard timeout given the daemon default.
    pub fn hard(&self, default: Duration) -> Duration {
        self.hard_secs.map(Duration::from_secs).unwrap_or(default)
    }

    /// Effective log-silence timeout given the daemon default.
    pub fn log_silence(&self, default: Duration) -> Duration {
        self.log_silence_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_builder() {
        let job = BuildJob::new(Repository::new("crane-build/worker", "abc123").with_branch("main"))
            .with_language("rust")
            .with_script(serde_json::json!({"install": ["cargo fetch"]}))
            .with_timeouts(JobTimeouts {
                hard_secs: Some(600),
                log_silence_secs: None,
            });

        assert_eq!(job.repository.slug, "crane-build/worker");
        assert_eq!(job.repository.branch.as_deref(), Some("main"));
        assert_eq!(job.language.as_deref(), Some("rust"));
        assert_eq!(job.timeouts.hard_secs, Some(600));
        assert!(job.extra.is_empty());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let raw = serde_json::json!({
            "job_id": "6f7c9a1e-0b76-4c65-9f6a-3a3f2a1b5c4d",
            "repository": {"slug": "octo/repo", "commit": "deadbeef"},
            "dispatched_by": "scheduler-7",
            "vm_config": {"gpu_count": 1},
        });

        let job: BuildJob = serde_json::from_value(raw).unwrap();
        assert_eq!(job.extra["dispatched_by"], "scheduler-7");
        assert_eq!(job.extra["vm_config"]["gpu_count"], 1);

        // Round-trip keeps the unknown fields at the top level.
        let out = serde_json::to_value(&job).unwrap();
        assert_eq!(out["dispatched_by"], "scheduler-7");
        assert_eq!(out["vm_config"]["gpu_count"], 1);
    }

    #[test]
    fn timeout_defaults_resolve() {
        let timeouts = JobTimeouts::default();
        assert_eq!(
            timeouts.hard(Duration::from_secs(3000)),
            Duration::from_secs(3000)
        );

        let timeouts = JobTimeouts {
            hard_secs: Some(10),
            log_silence_secs: Some(5),
        };
        assert_eq!(
            timeouts.hard(Duration::from_secs(3000)),
            Duration::from_secs(10)
        );
        assert_eq!(
            timeouts.log_silence(Duration::from_secs(600)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn missing_timeouts_default() {
        let raw = serde_json::json!({
            "job_id": "6f7c9a1e-0b76-4c65-9f6a-3a3f2a1b5c4d",
            "repository": {"slug": "octo/repo", "commit": "deadbeef"},
        });

        let job: BuildJob = serde_json::from_value(raw).unwrap();
        assert_eq!(job.timeouts, JobTimeouts::default());
        assert_eq!(job.image, ImageSelector::default());
        assert!(job.language.is_none());
    }
}
