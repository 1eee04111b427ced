//! Compensating transactions for atomic jobs.
//!
//! The gateway does not know how the host mutates its state. It only asks
//! the host's mutation layer to open a scope before an atomic job, to fold
//! the scope into a single undo step when the job succeeds, and to revert
//! everything inside the scope when it fails.

use anyhow::anyhow;
use hostgate_core::UndoGroupId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Host mutation layer seen by the execution engine.
pub trait UndoManager: Send + Sync {
    /// Open a scope; every later mutation belongs to it until commit or revert.
    fn begin(&self, label: &str) -> anyhow::Result<UndoGroupId>;

    /// Collapse the scope into one compound undo unit.
    fn commit(&self, group: UndoGroupId, label: &str);

    /// Revert every effect recorded since `begin`.
    fn revert_all(&self, group: UndoGroupId);
}

/// Undo manager for hosts without transactional support.
///
/// Hands out group ids so jobs still record a scope, but reverting does
/// nothing.
#[derive(Debug, Default)]
pub struct NoopUndo {
    next: AtomicU64,
}

impl NoopUndo {
    /// Create a new no-op manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl UndoManager for NoopUndo {
    fn begin(&self, _label: &str) -> anyhow::Result<UndoGroupId> {
        Ok(UndoGroupId(self.next.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn commit(&self, _group: UndoGroupId, _label: &str) {}

    fn revert_all(&self, group: UndoGroupId) {
        warn!("Revert of {} requested but the host has no undo support", group);
    }
}

/// Snapshot/restore undo over a shared state value.
///
/// `begin` clones the state; `revert_all` puts the clone back. Suits hosts
/// whose mutable state is cheap to copy.
pub struct SnapshotUndo<S> {
    state: Arc<Mutex<S>>,
    snapshots: Mutex<HashMap<UndoGroupId, S>>,
    next: AtomicU64,
}

impl<S: Clone + Send> SnapshotUndo<S> {
    /// Manage `state`, which handlers mutate through the same `Arc`.
    pub fn new(state: Arc<Mutex<S>>) -> Self {
        Self {
            state,
            snapshots: Mutex::new(HashMap::new()),
            next: AtomicU64::new(0),
        }
    }

    /// Number of scopes currently open.
    pub fn open_scopes(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<S: Clone + Send> UndoManager for SnapshotUndo<S> {
    fn begin(&self, label: &str) -> anyhow::Result<UndoGroupId> {
        let snapshot = self
            .state
            .lock()
            .map_err(|_| anyhow!("host state lock poisoned"))?
            .clone();
        let group = UndoGroupId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.snapshots
            .lock()
            .map_err(|_| anyhow!("undo journal lock poisoned"))?
            .insert(group, snapshot);
        debug!("Opened {} for '{}'", group, label);
        Ok(group)
    }

    fn commit(&self, group: UndoGroupId, label: &str) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.remove(&group);
        }
        debug!("Committed {} as '{}'", group, label);
    }

    fn revert_all(&self, group: UndoGroupId) {
        let snapshot = match self.snapshots.lock() {
            Ok(mut snapshots) => snapshots.remove(&group),
            Err(_) => None,
        };
        let Some(snapshot) = snapshot else {
            warn!("No snapshot for {}, nothing to revert", group);
            return;
        };
        match self.state.lock() {
            Ok(mut state) => {
                *state = snapshot;
                debug!("Reverted {}", group);
            }
            Err(_) => warn!("Host state lock poisoned, could not revert {}", group),
        }
    }
}
