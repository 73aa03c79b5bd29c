//! Build-script generation.
//!
//! The generator is a pure function of the job payload as far as the
//! processor cares: job in, shell script out. The production implementation
//! POSTs the payload to the generator service.

use std::time::Duration;

use async_trait::async_trait;
use crane_core::BuildJob;

use crate::{Result, TRACING_TARGET_SCRIPT, WorkerError};

/// Turns a job payload into the shell script that builds it.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Generate the build script for a job.
    async fn generate(&self, job: &BuildJob) -> Result<Vec<u8>>;
}

/// Generator client for the build-script service.
#[derive(Debug, Clone)]
pub struct HttpScriptGenerator {
    client: reqwest::Client,
    url: String,
}

impl HttpScriptGenerator {
    /// Default request budget for one generation call.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a generator client for the given endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::script_with_source("building http client", e))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ScriptGenerator for HttpScriptGenerator {
    async fn generate(&self, job: &BuildJob) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .json(job)
            .send()
            .await
            .map_err(|e| WorkerError::script_with_source("generator request failed", e))?
            .error_for_status()
            .map_err(|e| WorkerError::script_with_source("generator rejected job", e))?;

        let script = response
            .bytes()
            .await
            .map_err(|e| WorkerError::script_with_source("reading generator response", e))?;

        tracing::debug!(
            target: TRACING_TARGET_SCRIPT,
            job_id = %job.job_id,
            script_bytes = script.len(),
            "generated build script"
        );

        Ok(script.to_vec())
    }
}

/// Generator for jobs that carry their script inline in the payload.
///
/// Used when no generator endpoint is configured; the job's `script` field
/// must then be a string holding the whole script.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScriptGenerator;

#[async_trait]
impl ScriptGenerator for InlineScriptGenerator {
    async fn generate(&self, job: &BuildJob) -> Result<Vec<u8>> {
        match job.script.as_str() {
            Some(script) if !script.is_empty() => Ok(script.as_bytes().to_vec()),
            Some(_) => Err(WorkerError::script("job carries an empty inline script")),
            None => Err(WorkerError::script(
                "job carries no inline script and no generator endpoint is configured",
            )),
        }
    }
}
