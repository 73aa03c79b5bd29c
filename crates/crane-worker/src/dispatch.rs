//! Control-command dispatch.
//!
//! One subscription to the control subject serves the whole pool. The
//! dispatcher keeps the `JobID → cancel signal` map; processors register a
//! job before provisioning and the registration deregisters itself when the
//! job reaches a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crane_nats::ControlCommand;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::TRACING_TARGET_DISPATCH;

#[derive(Clone)]
struct RegistrationEntry {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

/// Fan-out of control-plane commands to interested processors.
#[derive(Default)]
pub struct CommandDispatcher {
    registrations: Mutex<HashMap<Uuid, RegistrationEntry>>,
}

impl CommandDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job's cancel signal.
    ///
    /// The token is cancelled when a `cancel_job` command for this job
    /// arrives. Dropping the returned registration deregisters the job; at
    /// most one registration exists per job id.
    pub fn register(self: &Arc<Self>, job_id: Uuid, token: CancellationToken) -> CancelRegistration {
        let entry = RegistrationEntry {
            token,
            reason: Arc::new(Mutex::new(None)),
        };

        let previous = self
            .registrations
            .lock()
            .unwrap()
            .insert(job_id, entry.clone());

        if previous.is_some() {
            tracing::warn!(
                target: TRACING_TARGET_DISPATCH,
                job_id = %job_id,
                "replaced existing cancel registration"
            );
        }

        CancelRegistration {
            dispatcher: Arc::clone(self),
            job_id,
            reason: entry.reason,
        }
    }

    /// Deliver a cancellation. Returns whether a registration was found.
    ///
    /// Unknown job ids are dropped silently: the job completed already or
    /// runs on another worker — the control plane fans commands out to the
    /// whole fleet.
    pub fn cancel(&self, job_id: Uuid, reason: Option<&str>) -> bool {
        let entry = self.registrations.lock().unwrap().remove(&job_id);

        match entry {
            Some(entry) => {
                *entry.reason.lock().unwrap() = reason.map(str::to_string);
                // Fire outside the map lock: cancellation wakes processor
                // tasks, and none of that work belongs in the critical
                // section.
                entry.token.cancel();
                tracing::info!(
                    target: TRACING_TARGET_DISPATCH,
                    job_id = %job_id,
                    reason = reason.unwrap_or("none"),
                    "cancelled job"
                );
                true
            }
            None => {
                tracing::debug!(
                    target: TRACING_TARGET_DISPATCH,
                    job_id = %job_id,
                    "dropping cancel for unknown job"
                );
                false
            }
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    /// Whether no registrations are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume commands from the control subject until `stop` fires.
    pub async fn run<S>(self: Arc<Self>, mut commands: S, stop: CancellationToken)
    where
        S: Stream<Item = ControlCommand> + Send + Unpin,
    {
        loop {
            tokio::select! {
                biased;

                () = stop.cancelled() => {
                    tracing::info!(
                        target: TRACING_TARGET_DISPATCH,
                        "shutdown requested, stopping command dispatcher"
                    );
                    break;
                }

                command = commands.next() => match command {
                    Some(ControlCommand::CancelJob { job_id, reason }) => {
                        self.cancel(job_id, reason.as_deref());
                    }
                    None => {
                        tracing::warn!(
                            target: TRACING_TARGET_DISPATCH,
                            "control stream closed"
                        );
                        break;
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("registrations", &self.len())
            .finish()
    }
}

/// Live registration of a job's cancel signal.
///
/// Deregisters on drop, which is how the map invariant (at most one entry
/// per job, none after terminal state) is kept without a second code path.
pub struct CancelRegistration {
    dispatcher: Arc<CommandDispatcher>,
    job_id: Uuid,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelRegistration {
    /// The job this registration belongs to.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Reason carried by the cancel command, once one arrived.
    pub fn cancel_reason(&self) -> Option<String> {
        self.reason.lock().unwrap().clone()
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.dispatcher
            .registrations
            .lock()
            .unwrap()
            .remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_fires_registered_token() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let job_id = Uuid::new_v4();
        let token = CancellationToken::new();

        let registration = dispatcher.register(job_id, token.clone());
        assert_eq!(dispatcher.len(), 1);

        assert!(dispatcher.cancel(job_id, Some("user request")));
        assert!(token.is_cancelled());
        assert_eq!(registration.cancel_reason().as_deref(), Some("user request"));

        // Entry removed on cancel; a second command is dropped silently.
        assert_eq!(dispatcher.len(), 0);
        assert!(!dispatcher.cancel(job_id, None));
    }

    #[test]
    fn unknown_job_is_dropped() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        assert!(!dispatcher.cancel(Uuid::new_v4(), Some("already done")));
    }

    #[test]
    fn drop_deregisters() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let job_id = Uuid::new_v4();
        let token = CancellationToken::new();

        {
            let _registration = dispatcher.register(job_id, token.clone());
            assert_eq!(dispatcher.len(), 1);
        }

        assert!(dispatcher.is_empty());
        assert!(!dispatcher.cancel(job_id, None));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn at_most_one_registration_per_job() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let job_id = Uuid::new_v4();

        let first_token = CancellationToken::new();
        let _first = dispatcher.register(job_id, first_token.clone());
        let second_token = CancellationToken::new();
        let _second = dispatcher.register(job_id, second_token.clone());

        assert_eq!(dispatcher.len(), 1);

        // The replacement owns the entry now.
        dispatcher.cancel(job_id, None);
        assert!(!first_token.is_cancelled());
        assert!(second_token.is_cancelled());
    }

    #[tokio::test]
    async fn run_dispatches_commands() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let job_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let _registration = dispatcher.register(job_id, token.clone());

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let stop = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&dispatcher).run(
            tokio_stream::wrappers::ReceiverStream::new(rx),
            stop.clone(),
        ));

        tx.send(ControlCommand::CancelJob {
            job_id,
            reason: Some("tear it down".to_string()),
        })
        .await
        .unwrap();

        token.cancelled().await;
        stop.cancel();
        task.await.unwrap();
    }
}
