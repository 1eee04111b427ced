//! Scheduler errors.

use hostgate_core::{AgentId, JobStatus, Ticket};
use hostgate_storage::StoreError;

/// Errors reported to callers of the scheduler. None of them mutate state.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Submission had no commands
    #[error("A batch needs at least one command")]
    EmptyBatch,

    /// Submission named a tool nobody registered
    #[error("Unknown tool '{tool}' at command {index}")]
    UnknownTool {
        /// Position in the batch
        index: usize,
        /// Requested tool
        tool: String,
    },

    /// Ticket not in the store
    #[error("Ticket '{0}' not found or expired")]
    NotFound(Ticket),

    /// Requester does not own the job
    #[error("Job {ticket} belongs to another agent than {requester}")]
    NotOwner {
        /// Target job
        ticket: Ticket,
        /// Agent that asked
        requester: AgentId,
    },

    /// Job is past the point where it can be cancelled
    #[error("Job {ticket} is {status} and can no longer be cancelled")]
    NotCancellable {
        /// Target job
        ticket: Ticket,
        /// Its current status
        status: JobStatus,
    },

    /// Store rejected an operation
    #[error(transparent)]
    Store(#[from] StoreError),
}
