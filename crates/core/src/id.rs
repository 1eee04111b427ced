//! Identifiers for gateway entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

const TICKET_PREFIX: &str = "job-";

/// Polling ticket handed back to the submitting agent.
///
/// Tickets are minted from a monotonic counter owned by the ticket store,
/// so the sequence number doubles as a stable FIFO tiebreaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(String);

impl Ticket {
    /// Build the ticket for sequence number `seq`.
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("{TICKET_PREFIX}{seq}"))
    }

    /// Sequence number encoded in the ticket, if it was minted by a store.
    pub fn seq(&self) -> Option<u64> {
        self.0.strip_prefix(TICKET_PREFIX)?.parse().ok()
    }

    /// Borrow the raw ticket string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticket {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Ticket {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier for an agent (could be AI, human, or system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create a new agent ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Agent used when a caller does not identify itself.
    pub fn anonymous() -> Self {
        Self("anonymous".to_string())
    }

    /// Borrow the raw agent name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of one gateway process lifetime.
///
/// Written into audit records so tickets from different runs can be told
/// apart even if the persisted counter was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Ulid);

impl SessionId {
    /// Generate a new SessionId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle of a compensating-transaction scope opened for an atomic job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UndoGroupId(pub u64);

impl std::fmt::Display for UndoGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "undo#{}", self.0)
    }
}
