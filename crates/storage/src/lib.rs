//! Ticket store, persistence and audit log for hostgate.
//!
//! This crate owns the job table and everything that moves it to and from
//! disk: the JSON state document and the append-only audit log.

#![warn(missing_docs)]

pub mod trait_;
pub mod store;
pub mod json_storage;
pub mod audit;

pub use trait_::{StateBackend, StoreError, Result};
pub use store::{AgentCounts, StateDocument, TicketStore, INTERRUPTED_ERROR, STATE_VERSION};
pub use json_storage::{load_store, read_document, save_store, JsonFileBackend, MemoryBackend, STATE_FILE_NAME};
pub use audit::{AuditLog, AuditRecord, GatewaySettings, AUDIT_FILE_NAME, SETTINGS_FILE_NAME};
