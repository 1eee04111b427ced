//! The execution engine - runs one job's commands in order.
//!
//! Execution is split in two halves. [`ExecutionEngine::begin`] runs on the
//! scheduler's turn and performs the synchronous bookkeeping (status,
//! undo scope). The returned [`JobRun`] is a self-contained future body that
//! never touches the ticket store: it reports through a [`JobUpdate`]
//! channel and the scheduler applies the updates on its own turn.

use futures::FutureExt;
use hostgate_core::{
    Command, CommandOutcome, CommandResult, JobStatus, Ticket, UndoGroupId,
};
use hostgate_storage::{Result, TicketStore};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::{HandlerRegistry, NoopUndo, UndoManager};

/// Progress report from a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// One command finished (successfully or not)
    CommandFinished {
        /// Job the command belongs to
        ticket: Ticket,
        /// Its result
        result: CommandResult,
    },
    /// The job reached a terminal state
    Finished {
        /// Finished job
        ticket: Ticket,
        /// How it ended
        outcome: JobOutcome,
    },
}

/// Terminal summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// `Done` or `Failed`
    pub status: JobStatus,
    /// Failure description
    pub error: Option<String>,
    /// First failing command
    pub failed_at_command: Option<usize>,
    /// Whether the undo scope was reverted
    pub rolled_back: bool,
}

impl JobOutcome {
    fn done() -> Self {
        Self {
            status: JobStatus::Done,
            error: None,
            failed_at_command: None,
            rolled_back: false,
        }
    }

    fn failed(error: String, failed_at_command: Option<usize>, rolled_back: bool) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error),
            failed_at_command,
            rolled_back,
        }
    }
}

/// Runs jobs against the registered handlers.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<HandlerRegistry>,
    undo: Arc<dyn UndoManager>,
}

impl ExecutionEngine {
    /// Create an engine without transactional support.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            undo: Arc::new(NoopUndo::new()),
        }
    }

    /// Set the host's undo manager.
    pub fn with_undo(mut self, undo: Arc<dyn UndoManager>) -> Self {
        self.undo = undo;
        self
    }

    /// Get the handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Mark the job running and open its undo scope if atomic.
    ///
    /// Returns `None` when the job ended on the spot because the undo scope
    /// could not be opened; the job is then already `Failed`.
    pub fn begin(&self, store: &mut TicketStore, ticket: &Ticket) -> Result<Option<JobRun>> {
        let job = store.transition(ticket, JobStatus::Running)?;
        info!("Starting job {} '{}' ({} commands)", job.ticket, job.label, job.total());

        let mut undo_group = None;
        if job.atomic {
            match self.undo.begin(&job.label) {
                Ok(group) => {
                    job.undo_group = Some(group);
                    undo_group = Some(group);
                }
                Err(e) => {
                    error!("Could not open transaction for {}: {:#}", ticket, e);
                    let job = store.transition(ticket, JobStatus::Failed)?;
                    job.error = Some(format!("Could not open transaction: {e:#}"));
                    return Ok(None);
                }
            }
        }

        Ok(Some(JobRun {
            ticket: job.ticket.clone(),
            label: job.label.clone(),
            atomic: job.atomic,
            commands: job.commands.clone(),
            undo_group,
            registry: self.registry.clone(),
            undo: self.undo.clone(),
        }))
    }

    /// Fold one update into the store.
    pub fn apply(store: &mut TicketStore, update: JobUpdate) {
        match update {
            JobUpdate::CommandFinished { ticket, result } => {
                let Some(job) = store.get_job_mut(&ticket) else {
                    warn!("Dropping result for vanished job {}", ticket);
                    return;
                };
                job.current_index = (result.index + 1).min(job.total());
                job.results.push(result);
            }
            JobUpdate::Finished { ticket, outcome } => {
                match store.transition(&ticket, outcome.status) {
                    Ok(job) => {
                        job.error = outcome.error;
                        job.failed_at_command = outcome.failed_at_command;
                        job.rolled_back = outcome.rolled_back;
                        info!("Job {} finished: {}", ticket, job.status);
                    }
                    Err(e) => warn!("Dropping completion of {}: {}", ticket, e),
                }
            }
        }
    }
}

/// Body of one dispatched job.
pub struct JobRun {
    ticket: Ticket,
    label: String,
    atomic: bool,
    commands: Vec<Command>,
    undo_group: Option<UndoGroupId>,
    registry: Arc<HandlerRegistry>,
    undo: Arc<dyn UndoManager>,
}

impl JobRun {
    /// Run every command and report the terminal outcome.
    ///
    /// Handler errors and panics end the job as `Failed`; they never escape.
    pub async fn execute(self, updates: UnboundedSender<JobUpdate>) {
        let outcome = self.run_commands(&updates).await;
        let _ = updates.send(JobUpdate::Finished {
            ticket: self.ticket.clone(),
            outcome,
        });
    }

    async fn run_commands(&self, updates: &UnboundedSender<JobUpdate>) -> JobOutcome {
        let total = self.commands.len();
        let mut failures = 0usize;
        let mut first_failure = None;

        for (index, command) in self.commands.iter().enumerate() {
            debug!("Job {} command {}/{}: {}", self.ticket, index + 1, total, command.tool);

            let outcome = match self.registry.get(&command.tool) {
                Some(handler) => match AssertUnwindSafe(handler.execute(&command.params))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(outcome)) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!("Job {} command {} ({}) panicked: {}", self.ticket, index, command.tool, message);
                        let rolled_back = self.rollback();
                        return JobOutcome::failed(
                            format!("Command {index} ({}) panicked: {message}", command.tool),
                            Some(index),
                            rolled_back,
                        );
                    }
                    Ok(Err(e)) => {
                        error!("Job {} command {} ({}) raised: {:#}", self.ticket, index, command.tool, e);
                        let rolled_back = self.rollback();
                        return JobOutcome::failed(
                            format!("Command {index} ({}) raised an error: {e:#}", command.tool),
                            Some(index),
                            rolled_back,
                        );
                    }
                },
                None => CommandOutcome::failed(format!("Unknown tool '{}'", command.tool)),
            };

            let success = outcome.success;
            let reason = outcome
                .message
                .clone()
                .unwrap_or_else(|| "command reported failure".to_string());
            let _ = updates.send(JobUpdate::CommandFinished {
                ticket: self.ticket.clone(),
                result: CommandResult::from_outcome(index, &command.tool, outcome),
            });

            if success {
                continue;
            }

            failures += 1;
            first_failure.get_or_insert(index);

            if self.atomic {
                warn!("Job {} command {} ({}) failed, rolling back", self.ticket, index, command.tool);
                let rolled_back = self.rollback();
                return JobOutcome::failed(
                    format!(
                        "Command {index} ({}) failed: {reason}; all changes rolled back",
                        command.tool
                    ),
                    Some(index),
                    rolled_back,
                );
            }
            debug!("Job {} command {} failed, continuing", self.ticket, index);
        }

        if failures > 0 {
            return JobOutcome::failed(
                format!("{failures} of {total} commands failed"),
                first_failure,
                false,
            );
        }

        if let Some(group) = self.undo_group {
            self.undo.commit(group, &self.label);
        }
        JobOutcome::done()
    }

    fn rollback(&self) -> bool {
        match self.undo_group {
            Some(group) => {
                self.undo.revert_all(group);
                info!("Rolled back {} for job {}", group, self.ticket);
                true
            }
            None => false,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
