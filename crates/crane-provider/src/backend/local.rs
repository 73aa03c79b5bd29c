//! Local subprocess backend.
//!
//! Provisions a scratch workspace per job and executes the build script in
//! a shell subprocess. Useful for single-machine deployments and for
//! exercising the full lifecycle without a cloud account.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigOption, ProviderConfig};
use crate::instance::{Instance, LogSink, RunResult};
use crate::provider::{Provider, StartAttributes};
use crate::registry::ProviderDescriptor;
use crate::{Error, Result, TRACING_TARGET_PROVIDER};

const DEFAULT_SHELL: &str = "/bin/sh";
const SCRIPT_FILE: &str = "build.sh";

/// Options the local backend recognizes.
pub const OPTIONS: &[ConfigOption] = &[
    ConfigOption {
        key: "shell",
        purpose: "shell used to execute build scripts (default /bin/sh)",
    },
    ConfigOption {
        key: "base_dir",
        purpose: "directory scratch workspaces are created under (default system temp)",
    },
];

/// Registry descriptor for the local backend.
pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new("local", "Local subprocess", OPTIONS, |config| {
        Ok(Arc::new(LocalProvider::from_config(config)?))
    })
}

/// Backend that runs build scripts in local subprocesses.
#[derive(Debug)]
pub struct LocalProvider {
    shell: String,
    base_dir: Option<PathBuf>,
}

impl LocalProvider {
    /// Build the backend from its flat configuration.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            shell: config.get_or("shell", DEFAULT_SHELL).to_string(),
            base_dir: config.get("base_dir").map(PathBuf::from),
        })
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn setup(&self, _cancel: &CancellationToken) -> Result<()> {
        if let Some(base_dir) = &self.base_dir {
            tokio::fs::create_dir_all(base_dir).await?;
        }
        Ok(())
    }

    async fn start(
        &self,
        cancel: &CancellationToken,
        attrs: &StartAttributes,
    ) -> Result<Box<dyn Instance>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let boot_started = Instant::now();
        let mut builder = tempfile::Builder::new();
        builder.prefix("crane-job-");

        let dir = match &self.base_dir {
            Some(base) => builder.tempdir_in(base)?,
            None => builder.tempdir()?,
        };

        let id = format!("local-{}", Uuid::new_v4());
        tracing::debug!(
            target: TRACING_TARGET_PROVIDER,
            instance_id = %id,
            job_id = %attrs.job_id,
            workdir = %dir.path().display(),
            "provisioned local workspace"
        );

        Ok(Box::new(LocalInstance {
            id,
            shell: self.shell.clone(),
            script_path: dir.path().join(SCRIPT_FILE),
            workdir: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
            startup: boot_started.elapsed(),
        }))
    }
}

/// One scratch workspace plus the subprocess that runs in it.
#[derive(Debug)]
pub struct LocalInstance {
    id: String,
    shell: String,
    script_path: PathBuf,
    workdir: PathBuf,
    dir: Mutex<Option<tempfile::TempDir>>,
    startup: Duration,
}

#[async_trait]
impl Instance for LocalInstance {
    async fn upload_script(&self, cancel: &CancellationToken, script: &[u8]) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::fs::write(&self.script_path, script)
            .await
            .map_err(|e| Error::upload(format!("writing {}: {e}", self.script_path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.script_path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| Error::upload(format!("chmod build script: {e}")))?;
        }

        Ok(())
    }

    async fn run_script(
        &self,
        cancel: &CancellationToken,
        sink: &dyn LogSink,
    ) -> Result<RunResult> {
        if cancel.is_cancelled() {
            return Ok(RunResult::incomplete());
        }

        let mut child = Command::new(&self.shell)
            .arg(&self.script_path)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::run(format!("spawning {}: {e}", self.shell)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::run("stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::run("stderr not captured"))?;

        let mut out_buf = vec![0u8; 8192];
        let mut err_buf = vec![0u8; 8192];
        let mut out_done = false;
        let mut err_done = false;
        let mut killed = false;
        let status = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled(), if !killed => {
                    killed = true;
                    // Kill failure means the process already exited; the
                    // wait arm below observes either way.
                    let _ = child.start_kill();
                }

                read = stdout.read(&mut out_buf), if !out_done => match read {
                    Ok(0) => out_done = true,
                    Ok(n) => {
                        sink.write(&out_buf[..n])
                            .await
                            .map_err(|e| Error::run(format!("streaming stdout: {e}")))?;
                    }
                    Err(e) => return Err(Error::run(format!("reading stdout: {e}"))),
                },

                read = stderr.read(&mut err_buf), if !err_done => match read {
                    Ok(0) => err_done = true,
                    Ok(n) => {
                        sink.write(&err_buf[..n])
                            .await
                            .map_err(|e| Error::run(format!("streaming stderr: {e}")))?;
                    }
                    Err(e) => return Err(Error::run(format!("reading stderr: {e}"))),
                },

                waited = child.wait(), if out_done && err_done => {
                    break waited.map_err(Error::Io)?;
                }
            }
        };

        if killed {
            return Ok(RunResult::incomplete());
        }
        Ok(RunResult::completed(status.code().unwrap_or(-1)))
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<()> {
        let mut guard = self.dir.lock().await;
        if let Some(dir) = guard.take() {
            tracing::debug!(
                target: TRACING_TARGET_PROVIDER,
                instance_id = %self.id,
                "removing local workspace"
            );
            dir.close()
                .map_err(|e| Error::stop(1, format!("removing workspace: {e}")))?;
        }
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn image_name(&self) -> &str {
        "local"
    }

    fn startup_duration(&self) -> Duration {
        self.startup
    }
}
