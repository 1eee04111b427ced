//! Host busy predicate.
//!
//! The scheduler never gets told when the host settles; it asks every tick.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Why the host cannot take disruptive work right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedBy {
    /// Sources are being compiled
    Compiling,
    /// In-memory state is being reloaded
    DomainReload,
    /// A test run is in progress
    TestsRunning,
    /// Busy for an unspecified reason
    HostBusy,
}

impl BlockedBy {
    fn code(self) -> u8 {
        match self {
            BlockedBy::Compiling => 1,
            BlockedBy::DomainReload => 2,
            BlockedBy::TestsRunning => 3,
            BlockedBy::HostBusy => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BlockedBy::Compiling),
            2 => Some(BlockedBy::DomainReload),
            3 => Some(BlockedBy::TestsRunning),
            4 => Some(BlockedBy::HostBusy),
            _ => None,
        }
    }
}

impl fmt::Display for BlockedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedBy::Compiling => write!(f, "compiling"),
            BlockedBy::DomainReload => write!(f, "domain_reload"),
            BlockedBy::TestsRunning => write!(f, "tests_running"),
            BlockedBy::HostBusy => write!(f, "host_busy"),
        }
    }
}

/// Polled predicate: can the host accept disruptive work?
pub trait BusySignal: Send + Sync {
    /// `Some(reason)` while disruptive work must wait.
    fn busy_reason(&self) -> Option<BlockedBy>;

    /// Whether the host is busy.
    fn is_busy(&self) -> bool {
        self.busy_reason().is_some()
    }
}

impl<F> BusySignal for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn busy_reason(&self) -> Option<BlockedBy> {
        self().then_some(BlockedBy::HostBusy)
    }
}

/// Host that is never busy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverBusy;

impl BusySignal for NeverBusy {
    fn busy_reason(&self) -> Option<BlockedBy> {
        None
    }
}

/// Shared, settable busy state.
///
/// Clones observe the same flag, so the host keeps one clone to flip and
/// hands another to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag {
    state: Arc<AtomicU8>,
}

impl BusyFlag {
    /// Idle flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the host busy for `reason`, or idle with `None`.
    pub fn set(&self, reason: Option<BlockedBy>) {
        self.state
            .store(reason.map_or(0, BlockedBy::code), Ordering::SeqCst);
    }

    /// Mark the host busy (unspecified reason) or idle.
    pub fn set_busy(&self, busy: bool) {
        self.set(busy.then_some(BlockedBy::HostBusy));
    }
}

impl BusySignal for BusyFlag {
    fn busy_reason(&self) -> Option<BlockedBy> {
        BlockedBy::from_code(self.state.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_shared_between_clones() {
        let host = BusyFlag::new();
        let seen_by_scheduler = host.clone();
        assert!(!seen_by_scheduler.is_busy());

        host.set(Some(BlockedBy::Compiling));
        assert_eq!(seen_by_scheduler.busy_reason(), Some(BlockedBy::Compiling));

        host.set_busy(false);
        assert!(!seen_by_scheduler.is_busy());
    }

    #[test]
    fn test_closure_signal_maps_to_host_busy() {
        let busy = || true;
        assert_eq!(busy.busy_reason(), Some(BlockedBy::HostBusy));
        assert!(!NeverBusy.is_busy());
    }

    #[test]
    fn test_blocked_by_vocabulary() {
        assert_eq!(serde_json::to_value(BlockedBy::DomainReload).unwrap(), "domain_reload");
        assert_eq!(BlockedBy::TestsRunning.to_string(), "tests_running");
    }
}
