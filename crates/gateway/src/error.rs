//! Caller-facing errors.

use hostgate_execution::SchedulerError;
use hostgate_storage::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Error codes reported to callers.
pub mod error_codes {
    /// Generic business error
    pub const BUSINESS_ERROR: i32 = -32000;
    /// Job is in a state that forbids the request
    pub const STATE_CONFLICT: i32 = -32001;
    /// Ticket not found or expired
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
    /// Job belongs to another agent
    pub const NOT_OWNER: i32 = -32005;
    /// Malformed submission
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal failure (storage)
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Error kind, stable across code renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Submission rejected
    InvalidRequest,
    /// Ticket unknown
    NotFound,
    /// Requester does not own the job
    NotOwner,
    /// Job can no longer be cancelled
    NotCancellable,
    /// Storage failure
    Internal,
}

/// Structured error returned by gateway operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    /// Error kind
    pub kind: ErrorKind,
    /// Numeric code, see [`error_codes`]
    pub code: i32,
    /// Error message
    pub message: String,
    /// Hint for the caller to fix the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether repeating the same request can succeed
    pub retryable: bool,
    /// Structured details (ticket, index, tool)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl GatewayError {
    fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            hint: None,
            retryable: false,
            data: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<SchedulerError> for GatewayError {
    fn from(err: SchedulerError) -> Self {
        let message = err.to_string();
        match err {
            SchedulerError::EmptyBatch => {
                GatewayError::new(ErrorKind::InvalidRequest, error_codes::INVALID_PARAMS, message)
                    .with_hint("Submit at least one command.")
            }
            SchedulerError::UnknownTool { index, tool } => {
                GatewayError::new(ErrorKind::InvalidRequest, error_codes::INVALID_PARAMS, message)
                    .with_hint("Check the tool name against the registered handlers.")
                    .with_data(json!({ "index": index, "tool": tool }))
            }
            SchedulerError::NotFound(ticket) => {
                GatewayError::new(ErrorKind::NotFound, error_codes::RESOURCE_NOT_FOUND, message)
                    .with_hint("Tickets are removed by the first poll that sees them finished, and expire if never polled.")
                    .with_data(json!({ "ticket": ticket }))
            }
            SchedulerError::NotOwner { ticket, requester } => {
                GatewayError::new(ErrorKind::NotOwner, error_codes::NOT_OWNER, message)
                    .with_hint("Only the submitting agent can cancel a job.")
                    .with_data(json!({ "ticket": ticket, "requester": requester }))
            }
            SchedulerError::NotCancellable { ticket, status } => {
                GatewayError::new(ErrorKind::NotCancellable, error_codes::STATE_CONFLICT, message)
                    .with_hint("Only queued jobs can be cancelled; poll until it finishes.")
                    .with_data(json!({ "ticket": ticket, "status": status }))
            }
            SchedulerError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(ticket) => SchedulerError::NotFound(ticket).into(),
            other => {
                let mut error =
                    GatewayError::new(ErrorKind::Internal, error_codes::INTERNAL_ERROR, other.to_string());
                error.retryable = true;
                error
            }
        }
    }
}
