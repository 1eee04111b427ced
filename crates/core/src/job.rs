//! Job model - one submitted batch of commands and its progress.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::id::{AgentId, Ticket, UndoGroupId};
use crate::tier::Tier;
use crate::Time;

/// Lifecycle state of a job.
///
/// Transitions are monotonic: `Queued → Running → {Done, Failed}` or
/// `Queued → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for the scheduler
    Queued,
    /// Commands are executing
    Running,
    /// Every command succeeded
    Done,
    /// At least one command failed, or execution aborted
    Failed,
    /// Withdrawn before it started
    Cancelled,
}

impl JobStatus {
    /// Whether the job can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single tool invocation inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Registered tool name
    pub tool: String,

    /// Opaque parameters passed to the handler
    #[serde(default)]
    pub params: Value,

    /// Effective tier after classification
    pub tier: Tier,

    /// Whether running this command invalidates host state
    #[serde(default)]
    pub disruptive: bool,
}

impl Command {
    /// Create a classified command.
    pub fn new(tool: impl Into<String>, params: Value, tier: Tier, disruptive: bool) -> Self {
        Self {
            tool: tool.into(),
            params,
            tier,
            disruptive,
        }
    }
}

/// What a handler reports for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Whether the command achieved its effect
    pub success: bool,

    /// Handler payload
    #[serde(default)]
    pub data: Value,

    /// Human-readable summary or failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandOutcome {
    /// Successful outcome carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    /// Failed outcome with a reason.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            message: Some(message.into()),
        }
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Recorded result of one attempted command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Position of the command in its job
    pub index: usize,

    /// Tool that ran
    pub tool: String,

    /// Whether it succeeded
    pub success: bool,

    /// Handler payload
    #[serde(default)]
    pub data: Value,

    /// Summary or failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    /// Wrap a handler outcome.
    pub fn from_outcome(index: usize, tool: impl Into<String>, outcome: CommandOutcome) -> Self {
        Self {
            index,
            tool: tool.into(),
            success: outcome.success,
            data: outcome.data,
            message: outcome.message,
        }
    }
}

/// A submitted batch tracked by the ticket store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Polling ticket
    pub ticket: Ticket,

    /// Owning agent
    pub agent: AgentId,

    /// Free-text label
    #[serde(default)]
    pub label: String,

    /// All-or-nothing execution
    pub atomic: bool,

    /// Batch tier (maximum over commands)
    pub tier: Tier,

    /// Current status
    pub status: JobStatus,

    /// Commands in execution order
    pub commands: Vec<Command>,

    /// Results of attempted commands
    #[serde(default)]
    pub results: Vec<CommandResult>,

    /// Progress cursor
    #[serde(default)]
    pub current_index: usize,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Index of the first failed command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at_command: Option<usize>,

    /// Whether a compensating revert ran
    #[serde(default)]
    pub rolled_back: bool,

    /// Whether any command is disruptive
    #[serde(default)]
    pub causes_domain_reload: bool,

    /// Compensating-transaction scope, once an atomic job starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_group: Option<UndoGroupId>,

    /// Creation timestamp
    pub created_at: Time,

    /// When execution began
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Time>,

    /// Set iff the job is terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Time>,
}

impl Job {
    /// Create a queued job.
    pub fn new(
        ticket: Ticket,
        agent: AgentId,
        label: impl Into<String>,
        atomic: bool,
        tier: Tier,
        commands: Vec<Command>,
    ) -> Self {
        let causes_domain_reload = commands.iter().any(|c| c.disruptive);
        Self {
            ticket,
            agent,
            label: label.into(),
            atomic,
            tier,
            status: JobStatus::Queued,
            commands,
            results: Vec::new(),
            current_index: 0,
            error: None,
            failed_at_command: None,
            rolled_back: false,
            causes_domain_reload,
            undo_group: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the job has finished, one way or another.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of commands in the batch.
    pub fn total(&self) -> usize {
        self.commands.len()
    }

    /// Tool names in execution order.
    pub fn tool_names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.tool.clone()).collect()
    }
}
