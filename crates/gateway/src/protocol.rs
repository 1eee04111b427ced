//! Wire shapes for submit, poll and cancel.

use hostgate_core::{AgentId, CommandResult, Job, JobStatus, Ticket, Tier};
use hostgate_execution::{BlockedBy, CommandRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed error reported when polling a cancelled job.
pub const CANCELLED_MESSAGE: &str = "Job was cancelled before it started";

/// A batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Submitting agent; anonymous when absent
    #[serde(default)]
    pub agent: Option<AgentId>,

    /// Free-text label
    #[serde(default)]
    pub label: String,

    /// All-or-nothing execution
    #[serde(default)]
    pub atomic: bool,

    /// Commands in execution order
    pub commands: Vec<CommandRequest>,
}

impl SubmitRequest {
    /// Non-atomic, anonymous submission of `commands`.
    pub fn new(commands: Vec<CommandRequest>) -> Self {
        Self {
            agent: None,
            label: String::new(),
            atomic: false,
            commands,
        }
    }

    /// Set the submitting agent.
    pub fn agent(mut self, agent: impl Into<AgentId>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Set the label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Make the batch atomic.
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }
}

/// Progress of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// 1-based index of the command being worked on
    pub current: usize,
    /// Commands in the job
    pub total: usize,
}

/// Answer to a poll (and to a submit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Whether the job finished successfully
    pub success: bool,

    /// Whether the caller should poll again
    pub pending: bool,

    /// Ticket polled
    pub ticket: Ticket,

    /// Job status
    pub status: JobStatus,

    /// Jobs strictly ahead (queued jobs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,

    /// Command progress (running jobs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,

    /// Suggested delay before the next poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_after_ms: Option<u64>,

    /// What a queued disruptive job is waiting on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<BlockedBy>,

    /// Results of attempted commands (finished jobs only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<CommandResult>,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// First failed command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at_command: Option<usize>,

    /// Whether the job's changes were reverted (failed jobs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,

    /// Submitting agent
    pub agent: AgentId,

    /// Job label
    pub label: String,

    /// Job tier
    pub tier: Tier,

    /// Whether the job is atomic
    pub atomic: bool,
}

impl PollResponse {
    fn base(job: &Job) -> Self {
        Self {
            success: false,
            pending: !job.is_terminal(),
            ticket: job.ticket.clone(),
            status: job.status,
            position: None,
            progress: None,
            poll_after_ms: None,
            blocked_by: None,
            results: Vec::new(),
            error: None,
            failed_at_command: None,
            rolled_back: None,
            agent: job.agent.clone(),
            label: job.label.clone(),
            tier: job.tier,
            atomic: job.atomic,
        }
    }

    /// Response for a job still waiting to run.
    pub fn queued(
        job: &Job,
        position: usize,
        blocked_by: Option<BlockedBy>,
        poll_after: Duration,
    ) -> Self {
        Self {
            position: Some(position),
            blocked_by,
            poll_after_ms: Some(poll_after.as_millis() as u64),
            ..Self::base(job)
        }
    }

    /// Response for a running job.
    pub fn running(job: &Job, poll_after: Duration) -> Self {
        let total = job.total();
        Self {
            progress: Some(Progress {
                current: (job.current_index + 1).min(total),
                total,
            }),
            poll_after_ms: Some(poll_after.as_millis() as u64),
            ..Self::base(job)
        }
    }

    /// Final response for a terminal job.
    pub fn finished(job: &Job) -> Self {
        let base = Self::base(job);
        match job.status {
            JobStatus::Done => Self {
                success: true,
                results: job.results.clone(),
                ..base
            },
            JobStatus::Cancelled => Self {
                error: Some(CANCELLED_MESSAGE.to_string()),
                ..base
            },
            _ => Self {
                results: job.results.clone(),
                error: job.error.clone(),
                failed_at_command: job.failed_at_command,
                rolled_back: Some(job.rolled_back),
                ..base
            },
        }
    }
}

/// Answer to a successful cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Always true; failures are [`crate::GatewayError`]s
    pub success: bool,
    /// Cancelled ticket
    pub ticket: Ticket,
    /// New status
    pub status: JobStatus,
}

impl CancelResponse {
    /// Acknowledge the cancellation of `job`.
    pub fn for_job(job: &Job) -> Self {
        Self {
            success: true,
            ticket: job.ticket.clone(),
            status: job.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgate_core::{Command, CommandOutcome};
    use serde_json::json;

    fn job(status: JobStatus) -> Job {
        let commands = vec![
            Command::new("a", json!({}), Tier::Smooth, false),
            Command::new("b", json!({}), Tier::Smooth, false),
        ];
        let mut job = Job::new(
            Ticket::from_seq(3),
            AgentId::new("agent"),
            "label",
            true,
            Tier::Smooth,
            commands,
        );
        job.status = status;
        job
    }

    #[test]
    fn test_queued_response() {
        let job = job(JobStatus::Queued);
        let response =
            PollResponse::queued(&job, 2, Some(BlockedBy::Compiling), Duration::from_secs(2));
        assert!(response.pending);
        assert!(!response.success);
        assert_eq!(response.position, Some(2));
        assert_eq!(response.poll_after_ms, Some(2000));

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["blocked_by"], "compiling");
        assert_eq!(value["status"], "queued");
        assert!(value.get("results").is_none());
    }

    #[test]
    fn test_running_progress_is_capped() {
        let mut job = job(JobStatus::Running);
        job.current_index = 1;
        let response = PollResponse::running(&job, Duration::from_secs(1));
        assert_eq!(response.progress, Some(Progress { current: 2, total: 2 }));

        job.current_index = 2;
        let response = PollResponse::running(&job, Duration::from_secs(1));
        assert_eq!(response.progress.unwrap().current, 2);
    }

    #[test]
    fn test_done_echoes_metadata() {
        let mut job = job(JobStatus::Done);
        job.results
            .push(CommandResult::from_outcome(0, "a", CommandOutcome::ok(json!(1))));
        let response = PollResponse::finished(&job);
        assert!(response.success);
        assert!(!response.pending);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.label, "label");
        assert_eq!(response.tier, Tier::Smooth);
        assert!(response.atomic);
        assert!(response.rolled_back.is_none());
    }

    #[test]
    fn test_failed_and_cancelled() {
        let mut failed = job(JobStatus::Failed);
        failed.error = Some("Command 1 (b) failed: x; all changes rolled back".to_string());
        failed.failed_at_command = Some(1);
        failed.rolled_back = true;
        let response = PollResponse::finished(&failed);
        assert!(!response.success);
        assert_eq!(response.failed_at_command, Some(1));
        assert_eq!(response.rolled_back, Some(true));

        let response = PollResponse::finished(&job(JobStatus::Cancelled));
        assert_eq!(response.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_submit_request_defaults() {
        let request: SubmitRequest =
            serde_json::from_value(json!({ "commands": [{ "tool": "echo" }] })).unwrap();
        assert!(request.agent.is_none());
        assert!(!request.atomic);
        assert_eq!(request.commands[0].params, serde_json::Value::Null);
    }
}
