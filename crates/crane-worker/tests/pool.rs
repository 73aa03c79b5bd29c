//! Pool supervision and shutdown scenarios.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    Disposition, MemoryLogs, MemoryQueue, PanicOnceProvider, StaticScript, fast_config, test_job,
    wait_until,
};
use crane_provider::backend::FakeProvider;
use crane_worker::{ProcessorPool, WorkerState};

fn state_with(provider: Arc<FakeProvider>, config: crane_worker::WorkerConfig) -> WorkerState {
    WorkerState::new(
        config,
        provider,
        Arc::new(StaticScript::default()),
        Arc::new(MemoryLogs::default()),
    )
}

#[tokio::test]
async fn pool_fans_out_and_drains_cleanly() {
    let queue = MemoryQueue::new();
    let provider = Arc::new(FakeProvider::new());
    let mut config = fast_config();
    config.pool_size = 2;

    let jobs: Vec<_> = (0..4).map(|_| test_job()).collect();
    for job in &jobs {
        queue.push_job(job);
    }

    let pool = ProcessorPool::new(state_with(provider.clone(), config), Arc::new(queue.clone()));
    let handle = pool.handle();
    let task = tokio::spawn(pool.run());

    let queue_probe = queue.clone();
    assert!(wait_until(Duration::from_secs(10), || queue_probe.dispositions().len() == 4).await);
    for job in &jobs {
        assert_eq!(queue.disposition_for(job.job_id), Some(Disposition::Ack));
    }

    handle.shutdown().await;
    task.await.unwrap().unwrap();

    // Resource conservation across the whole run.
    assert_eq!(provider.started_count(), 4);
    assert_eq!(provider.stopped_count(), 4);
    assert_eq!(provider.live_count(), 0);
}

#[tokio::test]
async fn graceful_shutdown_finishes_inflight_and_leaves_queued_work() {
    let queue = MemoryQueue::new();
    let provider = Arc::new(FakeProvider::new().with_run_delay(Duration::from_millis(500)));
    let config = fast_config();

    let running_job = test_job();
    let queued_job = test_job();
    queue.push_job(&running_job);
    queue.push_job(&queued_job);

    let pool = ProcessorPool::new(state_with(provider.clone(), config), Arc::new(queue.clone()));
    let handle = pool.handle();
    let task = tokio::spawn(pool.run());

    // Wait until the first job is actually building.
    let provider_probe = provider.clone();
    assert!(wait_until(Duration::from_secs(10), || provider_probe.started_count() == 1).await);

    handle.shutdown().await;
    task.await.unwrap().unwrap();

    // The in-flight job ran its full lifecycle.
    assert_eq!(
        queue.disposition_for(running_job.job_id),
        Some(Disposition::Ack)
    );
    assert_eq!(provider.stopped_count(), 1);
    assert_eq!(provider.live_count(), 0);

    // The second delivery was never claimed by this worker.
    assert_eq!(queue.disposition_for(queued_job.job_id), None);
    assert_eq!(queue.remaining(), 1);
}

#[tokio::test]
async fn exhausted_drain_budget_hard_stops_the_pool() {
    let queue = MemoryQueue::new();
    let provider = Arc::new(FakeProvider::new().with_run_delay(Duration::from_secs(60)));
    let mut config = fast_config();
    config.shutdown_timeout_secs = 1;

    let job = test_job();
    queue.push_job(&job);

    let pool = ProcessorPool::new(state_with(provider.clone(), config), Arc::new(queue.clone()));
    let handle = pool.handle();
    let task = tokio::spawn(pool.run());

    let provider_probe = provider.clone();
    assert!(wait_until(Duration::from_secs(10), || provider_probe.started_count() == 1).await);

    let shutdown_started = tokio::time::Instant::now();
    handle.shutdown().await;
    assert!(shutdown_started.elapsed() >= Duration::from_secs(1));
    assert!(shutdown_started.elapsed() < Duration::from_secs(10));

    task.await.unwrap().unwrap();

    // The hard stop cut the run and the cleanup context with it: the job
    // goes back to the broker, the instance is reported leaked.
    assert_eq!(
        queue.disposition_for(job.job_id),
        Some(Disposition::NackRequeue)
    );
    assert_eq!(provider.live_count(), 1);
}

#[tokio::test]
async fn broker_loss_surfaces_from_run() {
    let queue = MemoryQueue::new_failing();
    let provider = Arc::new(FakeProvider::new());

    let pool = ProcessorPool::new(state_with(provider, fast_config()), Arc::new(queue));
    let result = pool.run().await;

    assert!(result.is_err());
}

#[tokio::test]
async fn panicked_processor_is_replaced() {
    let queue = MemoryQueue::new();
    let fake = Arc::new(FakeProvider::new());
    let provider = Arc::new(PanicOnceProvider::new(fake.clone()));
    let config = fast_config();

    let state = WorkerState::new(
        config,
        provider,
        Arc::new(StaticScript::default()),
        Arc::new(MemoryLogs::default()),
    );

    // The first delivery blows up the processor; the replacement handles
    // the second.
    let doomed = test_job();
    let survivor = test_job();
    queue.push_job(&doomed);
    queue.push_job(&survivor);

    let pool = ProcessorPool::new(state, Arc::new(queue.clone()));
    let handle = pool.handle();
    let task = tokio::spawn(pool.run());

    let queue_probe = queue.clone();
    let survivor_id = survivor.job_id;
    assert!(
        wait_until(Duration::from_secs(10), || queue_probe
            .disposition_for(survivor_id)
            .is_some())
        .await
    );
    assert_eq!(
        queue.disposition_for(survivor.job_id),
        Some(Disposition::Ack)
    );

    handle.shutdown().await;
    task.await.unwrap().unwrap();

    assert_eq!(fake.started_count(), 1);
    assert_eq!(fake.stopped_count(), 1);
}
