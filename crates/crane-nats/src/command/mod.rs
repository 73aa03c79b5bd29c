//! Control-plane commands.
//!
//! Commands ride plain core NATS subjects (not JetStream): the control plane
//! fans cancellation out to every worker, and a worker that does not hold the
//! job simply drops the command.

mod subscriber;

use serde::{Deserialize, Serialize};
pub use subscriber::{CommandPublisher, CommandSubscriber};
use uuid::Uuid;

/// Typed command received on the control subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Cancel a job that may be running on this worker.
    CancelJob {
        job_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Subject the control plane publishes commands for a queue on.
pub fn control_subject(queue_name: &str) -> String {
    format!("builds.{}.control", queue_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_subject_generation() {
        assert_eq!(control_subject("linux"), "builds.linux.control");
    }

    #[test]
    fn cancel_command_wire_shape() {
        let raw = serde_json::json!({
            "type": "cancel_job",
            "job_id": "6f7c9a1e-0b76-4c65-9f6a-3a3f2a1b5c4d",
            "reason": "requested by user",
        });

        let command: ControlCommand = serde_json::from_value(raw).unwrap();
        let ControlCommand::CancelJob { job_id, reason } = command;
        assert_eq!(
            job_id.to_string(),
            "6f7c9a1e-0b76-4c65-9f6a-3a3f2a1b5c4d"
        );
        assert_eq!(reason.as_deref(), Some("requested by user"));
    }

    #[test]
    fn cancel_command_reason_optional() {
        let raw = serde_json::json!({
            "type": "cancel_job",
            "job_id": "6f7c9a1e-0b76-4c65-9f6a-3a3f2a1b5c4d",
        });

        let command: ControlCommand = serde_json::from_value(raw).unwrap();
        let ControlCommand::CancelJob { reason, .. } = command;
        assert!(reason.is_none());
    }
}
