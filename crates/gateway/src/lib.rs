//! Caller-facing gateway for hostgate.
//!
//! Wraps the scheduler with the polling protocol, structured errors,
//! persistence and the audit log, and drives it from a fixed-rate tick loop.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod gateway;

pub use config::{GatewayConfig, DEFAULT_STATE_DIR};
pub use error::{error_codes, ErrorKind, GatewayError};
pub use protocol::{CancelResponse, PollResponse, Progress, SubmitRequest, CANCELLED_MESSAGE};
pub use gateway::{spawn_tick_loop, Gateway, GatewayStatus};
