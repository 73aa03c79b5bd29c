//! Shared doubles for the lifecycle suites.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crane_core::{BuildJob, JobDelivery, JobFeed, JobHandle, JobSource, Repository};
use crane_provider::{Instance, LogSink, Provider, Result as ProviderResult, StartAttributes};
use crane_worker::{BuildLogs, Result as WorkerResult, ScriptGenerator, WorkerConfig, WorkerError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Terminal disposition recorded by the memory queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    NackRequeue,
    NackDrop,
}

#[derive(Default)]
struct QueueInner {
    jobs: Mutex<VecDeque<(String, Vec<u8>)>>,
    dispositions: Mutex<Vec<(String, Disposition)>>,
    fail_when_empty: bool,
}

/// In-memory stand-in for the broker queue.
///
/// Requeued deliveries are recorded but not redelivered, so a test observes
/// each job's single disposition.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose sources fail once drained, like a dropped broker
    /// connection.
    pub fn new_failing() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                fail_when_empty: true,
                ..Default::default()
            }),
        }
    }

    pub fn push_job(&self, job: &BuildJob) {
        let payload = serde_json::to_vec(job).unwrap();
        self.inner
            .jobs
            .lock()
            .unwrap()
            .push_back((job.job_id.to_string(), payload));
    }

    pub fn push_raw(&self, label: &str, payload: &[u8]) {
        self.inner
            .jobs
            .lock()
            .unwrap()
            .push_back((label.to_string(), payload.to_vec()));
    }

    pub fn remaining(&self) -> usize {
        self.inner.jobs.lock().unwrap().len()
    }

    pub fn dispositions(&self) -> Vec<(String, Disposition)> {
        self.inner.dispositions.lock().unwrap().clone()
    }

    pub fn disposition_for(&self, job_id: Uuid) -> Option<Disposition> {
        self.disposition_for_label(&job_id.to_string())
    }

    pub fn disposition_for_label(&self, label: &str) -> Option<Disposition> {
        self.inner
            .dispositions
            .lock()
            .unwrap()
            .iter()
            .find(|(recorded, _)| recorded == label)
            .map(|(_, disposition)| *disposition)
    }

    /// Open a source directly, for driving a single processor.
    pub fn source(&self) -> Box<dyn JobSource> {
        Box::new(MemorySource {
            inner: Arc::clone(&self.inner),
        })
    }
}

#[async_trait]
impl JobFeed for MemoryQueue {
    async fn subscribe(&self) -> crane_core::Result<Box<dyn JobSource>> {
        Ok(self.source())
    }
}

struct MemorySource {
    inner: Arc<QueueInner>,
}

#[async_trait]
impl JobSource for MemorySource {
    async fn next(&mut self) -> crane_core::Result<Option<JobDelivery>> {
        let next = self.inner.jobs.lock().unwrap().pop_front();
        match next {
            Some((label, payload)) => Ok(Some(JobDelivery::new(
                payload,
                Box::new(MemoryHandle {
                    label,
                    inner: Arc::clone(&self.inner),
                }) as Box<dyn JobHandle>,
            ))),
            None if self.inner.fail_when_empty => {
                Err(crane_core::Error::broker("connection reset by peer"))
            }
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(None)
            }
        }
    }
}

struct MemoryHandle {
    label: String,
    inner: Arc<QueueInner>,
}

impl MemoryHandle {
    fn record(&self, disposition: Disposition) {
        self.inner
            .dispositions
            .lock()
            .unwrap()
            .push((self.label.clone(), disposition));
    }
}

#[async_trait]
impl JobHandle for MemoryHandle {
    async fn ack(self: Box<Self>) -> crane_core::Result<()> {
        self.record(Disposition::Ack);
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> crane_core::Result<()> {
        self.record(if requeue {
            Disposition::NackRequeue
        } else {
            Disposition::NackDrop
        });
        Ok(())
    }
}

/// Script generator returning a fixed script.
#[derive(Clone)]
pub struct StaticScript(pub Vec<u8>);

impl Default for StaticScript {
    fn default() -> Self {
        Self(b"#!/bin/sh\ntrue\n".to_vec())
    }
}

#[async_trait]
impl ScriptGenerator for StaticScript {
    async fn generate(&self, _job: &BuildJob) -> WorkerResult<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Script generator that always fails.
#[derive(Clone, Copy, Default)]
pub struct FailingScript;

#[async_trait]
impl ScriptGenerator for FailingScript {
    async fn generate(&self, _job: &BuildJob) -> WorkerResult<Vec<u8>> {
        Err(WorkerError::script("generator unavailable"))
    }
}

/// In-memory build logs, keyed by job.
#[derive(Clone, Default)]
pub struct MemoryLogs {
    inner: Arc<Mutex<HashMap<Uuid, Vec<u8>>>>,
}

impl MemoryLogs {
    pub fn output(&self, job_id: Uuid) -> Vec<u8> {
        self.inner
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl BuildLogs for MemoryLogs {
    fn sink_for(&self, job_id: Uuid) -> Arc<dyn LogSink> {
        Arc::new(MemorySink {
            inner: Arc::clone(&self.inner),
            job_id,
        })
    }
}

struct MemorySink {
    inner: Arc<Mutex<HashMap<Uuid, Vec<u8>>>>,
    job_id: Uuid,
}

#[async_trait]
impl LogSink for MemorySink {
    async fn write(&self, chunk: &[u8]) -> std::io::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .entry(self.job_id)
            .or_default()
            .extend_from_slice(chunk);
        Ok(())
    }
}

/// Provider that panics on its first start, then delegates.
#[derive(Debug)]
pub struct PanicOnceProvider {
    inner: Arc<dyn Provider>,
    panicked: std::sync::atomic::AtomicBool,
}

impl PanicOnceProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self {
            inner,
            panicked: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Provider for PanicOnceProvider {
    fn name(&self) -> &'static str {
        "panic-once"
    }

    async fn setup(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        self.inner.setup(cancel).await
    }

    async fn start(
        &self,
        cancel: &CancellationToken,
        attrs: &StartAttributes,
    ) -> ProviderResult<Box<dyn Instance>> {
        if !self
            .panicked
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            panic!("synthetic processor panic");
        }
        self.inner.start(cancel, attrs).await
    }
}

/// A job against a fixed repository.
pub fn test_job() -> BuildJob {
    BuildJob::new(Repository::new("crane-build/demo", "deadbeef").with_branch("main"))
}

/// Configuration tuned for fast suites.
pub fn fast_config() -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.pool_size = 1;
    config.hard_timeout_secs = 30;
    config.log_timeout_secs = 30;
    config.script_upload_timeout_secs = 5;
    config.startup_timeout_secs = 5;
    config.stop_retries = 2;
    config.stop_interval_secs = 0;
    config.shutdown_timeout_secs = 30;
    config
}

/// Poll `condition` until it holds or `deadline` elapses.
pub async fn wait_until<F>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
