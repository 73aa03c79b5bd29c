#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crane_nats::{BrokerClient, CommandSubscriber, JobQueue, LogPublisher};
use crane_provider::ProviderRegistry;
use crane_worker::{
    BrokerBuildLogs, HttpScriptGenerator, InlineScriptGenerator, ProcessorPool, ScriptGenerator,
    WorkerState,
};
use tokio_util::sync::CancellationToken;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "crane_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "crane_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "crane_cli::config";

/// Ack-deadline slack on top of the hard timeout: a job must stay claimed
/// through its worst-case run plus teardown before the broker redelivers.
const ACK_WAIT_SLACK: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "worker terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "worker terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    Cli::init_tracing();
    cli.log();
    cli.validate().context("invalid configuration")?;

    // Provider backend, from the registry plus scraped PROVIDER_CONFIG_*.
    let registry = ProviderRegistry::builtin();
    let provider_config = config::provider_config_from_env();
    let provider = registry
        .create(&cli.worker.provider_name, &provider_config)
        .context("failed to create provider backend")?;

    provider
        .setup(&CancellationToken::new())
        .await
        .context("provider setup failed")?;

    // Broker session shared by the queue, the control subject, and the log
    // publisher.
    let client = BrokerClient::connect(cli.nats.clone())
        .await
        .context("failed to connect to broker")?;

    let queue = JobQueue::new(&client, &cli.worker.queue_name)
        .await
        .context("failed to open job queue")?
        .with_ack_wait(cli.worker.hard_timeout() + ACK_WAIT_SLACK);

    let script_generator: Arc<dyn ScriptGenerator> = match &cli.worker.script_generator_url {
        Some(url) => Arc::new(
            HttpScriptGenerator::new(url.clone())
                .context("failed to build script generator client")?,
        ),
        None => Arc::new(InlineScriptGenerator),
    };

    let logs = Arc::new(BrokerBuildLogs::new(LogPublisher::new(&client)));
    let state = WorkerState::new(cli.worker.clone(), provider, script_generator, logs);

    // Single control-subject subscription fanning out to the pool.
    let commands = CommandSubscriber::subscribe(&client, &cli.worker.queue_name)
        .await
        .context("failed to subscribe to control subject")?;
    let dispatcher_stop = CancellationToken::new();
    let dispatcher_task = tokio::spawn(
        Arc::clone(&state.dispatcher).run(commands.into_stream(), dispatcher_stop.clone()),
    );

    let pool = ProcessorPool::new(state, Arc::new(queue));
    let handle = pool.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.shutdown().await;
    });

    let result = pool.run().await;

    dispatcher_stop.cancel();
    let _ = dispatcher_task.await;

    result.context("processor pool failed")?;
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT/Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(
                target: TRACING_TARGET_SHUTDOWN,
                error = %e,
                "failed to install Ctrl+C handler"
            );
        } else {
            tracing::info!(
                target: TRACING_TARGET_SHUTDOWN,
                "received Ctrl+C signal, initiating graceful shutdown"
            );
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::info!(
                    target: TRACING_TARGET_SHUTDOWN,
                    "received SIGTERM signal, initiating graceful shutdown"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: TRACING_TARGET_SHUTDOWN,
                    error = %e,
                    "failed to install SIGTERM handler"
                );
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
