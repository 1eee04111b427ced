//! Persistence backend abstraction.

use async_trait::async_trait;
use hostgate_core::{JobStatus, Ticket};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Job not in the table
    #[error("Job {0} not found")]
    NotFound(Ticket),

    /// Lifecycle step the state machine forbids
    #[error("Job {ticket} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Affected job
        ticket: Ticket,
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// Document written by an incompatible version
    #[error("Unsupported state document version {0}")]
    UnsupportedVersion(u32),
}

/// Where the serialized job table lives between process runs.
///
/// Backends only move opaque JSON documents; the shape of the document is
/// owned by [`TicketStore`](crate::TicketStore).
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the last saved document, `None` if nothing was saved yet.
    async fn read(&self) -> Result<Option<String>>;

    /// Replace the saved document atomically.
    async fn write(&self, document: &str) -> Result<()>;
}
