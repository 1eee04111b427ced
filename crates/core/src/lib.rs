//! hostgate core data models.
//!
//! This crate defines the identifiers, execution tiers and job records
//! shared by the ticket store, the scheduler and the polling gateway.

#![warn(missing_docs)]

// Core identities
mod id;

// Classification
mod tier;

// Jobs
mod job;

// Re-exports
pub use id::{AgentId, SessionId, Ticket, UndoGroupId};
pub use tier::{ActionMatch, ActionRule, Classifier, Tier};
pub use job::{Command, CommandOutcome, CommandResult, Job, JobStatus};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
