//! Execution layer - handler registry, job execution and tier scheduling.

#![warn(missing_docs)]

pub mod registry;
pub mod undo;
pub mod host;
pub mod engine;
pub mod scheduler;
pub mod error;

pub use registry::{CommandHandler, HandlerInfo, HandlerRegistry, RegistryBuilder};
pub use undo::{NoopUndo, SnapshotUndo, UndoManager};
pub use host::{BlockedBy, BusyFlag, BusySignal, NeverBusy};
pub use engine::{ExecutionEngine, JobOutcome, JobRun, JobUpdate};
pub use scheduler::{
    CommandRequest, Scheduler, SchedulerConfig, SchedulerSummary, SubmitReceipt, TickReport,
};
pub use error::SchedulerError;
