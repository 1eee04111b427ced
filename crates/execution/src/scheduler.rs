//! Tier-aware job scheduling.
//!
//! The scheduler is driven by [`Scheduler::tick`], called once per host
//! cycle by a single owner. Heavy jobs are serialized through a FIFO and
//! an exclusive slot; smooth jobs run side by side when no heavy job is
//! pending or active; instant jobs run inline at submission.

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use hostgate_core::{
    AgentId, Classifier, Command, Job, JobStatus, Ticket, Tier,
};
use hostgate_storage::{AgentCounts, TicketStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace, warn};

use crate::{
    BlockedBy, BusySignal, ExecutionEngine, HandlerRegistry, JobUpdate, NeverBusy,
    SchedulerError, UndoManager,
};

/// Scheduling limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long finished jobs stay pollable
    pub expiry_window: Duration,
    /// Longest the heavy slot is held for a busy host after its job ended
    pub busy_hold_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_window: Duration::from_secs(300), // 5 minutes
            busy_hold_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl SchedulerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expiry window for finished jobs.
    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }

    /// Set (or disable with `None`) the busy hold timeout.
    pub fn with_busy_hold_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.busy_hold_timeout = timeout;
        self
    }
}

/// One requested command, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Tool name
    pub tool: String,

    /// Opaque parameters
    #[serde(default)]
    pub params: Value,
}

impl CommandRequest {
    /// Create a request.
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// What `submit` hands back.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    /// Snapshot of the job right after submission; terminal for instant jobs
    pub job: Job,
    /// Whether the job already ran inline
    pub inline: bool,
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Finished jobs reclaimed by the expiry sweep
    pub expired: Vec<Job>,
    /// Jobs started this tick
    pub dispatched: Vec<Ticket>,
    /// Heavy job whose slot was released
    pub released: Option<Ticket>,
    /// Heavy job whose busy hold timed out
    pub escalated: Option<Ticket>,
}

impl TickReport {
    /// Whether nothing happened.
    pub fn is_idle(&self) -> bool {
        self.expired.is_empty()
            && self.dispatched.is_empty()
            && self.released.is_none()
            && self.escalated.is_none()
    }
}

/// Read-only snapshot for caller-side backpressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSummary {
    /// Jobs waiting to run
    pub queue_depth: usize,
    /// Heavy jobs waiting for the exclusive slot
    pub heavy_pending: usize,
    /// Heavy job holding the slot
    pub active_heavy: Option<Ticket>,
    /// Smooth jobs currently running
    pub smooth_in_flight: usize,
    /// Whether the host reports busy
    pub host_busy: bool,
    /// Why the host is busy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_reason: Option<BlockedBy>,
    /// Times a busy hold had to be broken
    pub busy_hold_escalations: u64,
    /// Per-agent counts
    pub agents: BTreeMap<AgentId, AgentCounts>,
}

/// The tick-driven scheduler.
pub struct Scheduler {
    store: TicketStore,
    classifier: Classifier,
    engine: ExecutionEngine,
    busy: Arc<dyn BusySignal>,
    config: SchedulerConfig,
    heavy_queue: VecDeque<Ticket>,
    smooth_in_flight: HashSet<Ticket>,
    active_heavy: Option<Ticket>,
    hold_started: Option<Instant>,
    escalations: u64,
    in_flight: FuturesUnordered<BoxFuture<'static, ()>>,
    updates_tx: UnboundedSender<JobUpdate>,
    updates_rx: UnboundedReceiver<JobUpdate>,
}

impl Scheduler {
    /// Create a scheduler over `registry` with an empty store.
    pub fn new(registry: HandlerRegistry) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            store: TicketStore::new(),
            classifier: Classifier::with_default_rules(),
            engine: ExecutionEngine::new(registry),
            busy: Arc::new(NeverBusy),
            config: SchedulerConfig::default(),
            heavy_queue: VecDeque::new(),
            smooth_in_flight: HashSet::new(),
            active_heavy: None,
            hold_started: None,
            escalations: 0,
            in_flight: FuturesUnordered::new(),
            updates_tx,
            updates_rx,
        }
    }

    /// Set the tier classifier.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the host's undo manager.
    pub fn with_undo(mut self, undo: Arc<dyn UndoManager>) -> Self {
        self.engine = self.engine.with_undo(undo);
        self
    }

    /// Set the host busy predicate.
    pub fn with_busy_signal(mut self, busy: Arc<dyn BusySignal>) -> Self {
        self.busy = busy;
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adopt a restored store, re-queueing its waiting heavy jobs in
    /// submission order.
    pub fn with_store(mut self, store: TicketStore) -> Self {
        self.heavy_queue = store
            .queued_jobs()
            .into_iter()
            .filter(|j| j.tier == Tier::Heavy)
            .map(|j| j.ticket.clone())
            .collect();
        if !self.heavy_queue.is_empty() {
            info!("Re-queued {} heavy jobs from saved state", self.heavy_queue.len());
        }
        self.store = store;
        self
    }

    /// Classify and admit a batch.
    ///
    /// Instant batches run to completion before this returns.
    pub async fn submit(
        &mut self,
        agent: AgentId,
        label: impl Into<String>,
        atomic: bool,
        requests: Vec<CommandRequest>,
    ) -> Result<SubmitReceipt, SchedulerError> {
        if requests.is_empty() {
            return Err(SchedulerError::EmptyBatch);
        }

        let commands = self.classify(requests)?;
        let tier = Classifier::classify_batch(&commands);
        let job = self.store.create_job(agent, label, atomic, tier, commands);
        info!(
            "Submitted job {} for {} ({} tier, {} commands, atomic: {})",
            job.ticket,
            job.agent,
            tier,
            job.total(),
            atomic
        );

        match tier {
            Tier::Heavy => {
                self.heavy_queue.push_back(job.ticket.clone());
                Ok(SubmitReceipt { job, inline: false })
            }
            Tier::Smooth => Ok(SubmitReceipt { job, inline: false }),
            Tier::Instant => {
                if let Some(run) = self.engine.begin(&mut self.store, &job.ticket)? {
                    run.execute(self.updates_tx.clone()).await;
                }
                self.apply_updates();
                let job = self
                    .store
                    .get_job(&job.ticket)
                    .cloned()
                    .ok_or(SchedulerError::NotFound(job.ticket))?;
                Ok(SubmitReceipt { job, inline: true })
            }
        }
    }

    fn classify(&self, requests: Vec<CommandRequest>) -> Result<Vec<Command>, SchedulerError> {
        requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                let handler = self.engine.registry().get(&request.tool).ok_or_else(|| {
                    SchedulerError::UnknownTool {
                        index,
                        tool: request.tool.clone(),
                    }
                })?;
                let tier = self.classifier.classify(&request.tool, handler.tier(), &request.params);
                let disruptive = handler.causes_domain_reload() && tier == Tier::Heavy;
                Ok(Command::new(request.tool, request.params, tier, disruptive))
            })
            .collect()
    }

    /// Advance the scheduler by one host cycle.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.drive();

        report.expired = self.store.clean_expired(self.config.expiry_window);
        let store = &self.store;
        self.smooth_in_flight
            .retain(|t| store.get_job(t).is_some_and(|j| !j.is_terminal()));

        let busy = self.busy.is_busy();

        if let Some(active) = self.active_heavy.clone() {
            self.check_active_heavy(active, busy, &mut report);
            return report;
        }

        if !self.heavy_queue.is_empty() {
            if !self.smooth_in_flight.is_empty() {
                trace!(
                    "{} heavy jobs waiting for {} smooth jobs to drain",
                    self.heavy_queue.len(),
                    self.smooth_in_flight.len()
                );
                return report;
            }
            if let Some(ticket) = self.next_heavy_candidate(busy) {
                self.dispatch(&ticket);
                self.active_heavy = Some(ticket.clone());
                report.dispatched.push(ticket);
                self.drive();
                return report;
            }
            if !self.heavy_queue.is_empty() {
                return report;
            }
        }

        let smooth: Vec<Ticket> = self
            .store
            .queued_jobs()
            .into_iter()
            .filter(|j| j.tier == Tier::Smooth)
            .map(|j| j.ticket.clone())
            .collect();
        for ticket in smooth {
            if self.dispatch(&ticket) {
                self.smooth_in_flight.insert(ticket.clone());
                report.dispatched.push(ticket);
            }
        }
        if !report.dispatched.is_empty() {
            self.drive();
        }
        report
    }

    fn check_active_heavy(&mut self, active: Ticket, busy: bool, report: &mut TickReport) {
        let finished = self
            .store
            .get_job(&active)
            .map_or(true, |j| j.is_terminal());
        if !finished {
            return;
        }

        if !busy {
            debug!("Releasing heavy slot held by {}", active);
            self.release_heavy();
            report.released = Some(active);
            return;
        }

        let held_since = *self.hold_started.get_or_insert_with(Instant::now);
        let Some(timeout) = self.config.busy_hold_timeout else {
            return;
        };
        if held_since.elapsed() >= timeout {
            self.escalations += 1;
            error!(
                "Host still busy {:?} after heavy job {} finished; releasing the slot",
                held_since.elapsed(),
                active
            );
            self.release_heavy();
            report.escalated = Some(active.clone());
            report.released = Some(active);
        }
    }

    fn release_heavy(&mut self) {
        self.active_heavy = None;
        self.hold_started = None;
    }

    /// Pop heavy candidates in FIFO order. Jobs that would reload the host
    /// while it is busy go back to the tail so quieter heavy jobs behind
    /// them can still run. Each candidate is looked at once per tick.
    fn next_heavy_candidate(&mut self, busy: bool) -> Option<Ticket> {
        let mut remaining = self.heavy_queue.len();
        while remaining > 0 {
            remaining -= 1;
            let ticket = self.heavy_queue.pop_front()?;
            let Some(job) = self.store.get_job(&ticket) else {
                debug!("Dropping vanished heavy job {}", ticket);
                continue;
            };
            if job.status != JobStatus::Queued {
                debug!("Dropping {} heavy job {} from the queue", job.status, ticket);
                continue;
            }
            if busy && job.causes_domain_reload {
                trace!("Host busy, deferring disruptive job {}", ticket);
                self.heavy_queue.push_back(ticket);
                continue;
            }
            return Some(ticket);
        }
        None
    }

    fn dispatch(&mut self, ticket: &Ticket) -> bool {
        match self.engine.begin(&mut self.store, ticket) {
            Ok(Some(run)) => {
                self.in_flight.push(run.execute(self.updates_tx.clone()).boxed());
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Could not start job {}: {}", ticket, e);
                false
            }
        }
    }

    /// Poll in-flight jobs without blocking, then fold their updates into
    /// the store.
    fn drive(&mut self) {
        while let Some(Some(())) = self.in_flight.next().now_or_never() {}
        self.apply_updates();
    }

    fn apply_updates(&mut self) {
        while let Ok(update) = self.updates_rx.try_recv() {
            ExecutionEngine::apply(&mut self.store, update);
        }
    }

    /// Withdraw a queued job.
    ///
    /// `requester` must own the job; `None` is the privileged wildcard.
    pub fn cancel(
        &mut self,
        ticket: &Ticket,
        requester: Option<&AgentId>,
    ) -> Result<Job, SchedulerError> {
        let job = self
            .store
            .get_job(ticket)
            .ok_or_else(|| SchedulerError::NotFound(ticket.clone()))?;

        if let Some(requester) = requester {
            if &job.agent != requester {
                return Err(SchedulerError::NotOwner {
                    ticket: ticket.clone(),
                    requester: requester.clone(),
                });
            }
        }
        if job.status != JobStatus::Queued {
            return Err(SchedulerError::NotCancellable {
                ticket: ticket.clone(),
                status: job.status,
            });
        }

        let job = self.store.transition(ticket, JobStatus::Cancelled)?;
        job.error = Some("Cancelled before it started".to_string());
        let job = job.clone();
        self.heavy_queue.retain(|t| t != ticket);
        info!("Cancelled job {}", ticket);
        Ok(job)
    }

    /// Jobs strictly ahead of a queued job, counting the active heavy job.
    pub fn queue_position(&self, ticket: &Ticket) -> Option<usize> {
        let job = self.store.get_job(ticket)?;
        if job.status != JobStatus::Queued {
            return None;
        }
        let active = usize::from(self.active_heavy.is_some());
        let ahead = match job.tier {
            Tier::Heavy => self
                .heavy_queue
                .iter()
                .position(|t| t == ticket)
                .unwrap_or(self.heavy_queue.len()),
            _ => self.heavy_queue.len(),
        };
        Some(active + ahead)
    }

    /// Why a queued job is held back, if it is waiting on a busy host.
    pub fn blocked_by(&self, ticket: &Ticket) -> Option<BlockedBy> {
        let job = self.store.get_job(ticket)?;
        if job.status != JobStatus::Queued || !job.causes_domain_reload {
            return None;
        }
        self.busy.busy_reason()
    }

    /// Current host busy reason.
    pub fn busy_reason(&self) -> Option<BlockedBy> {
        self.busy.busy_reason()
    }

    /// Heavy job holding the exclusive slot.
    pub fn active_heavy(&self) -> Option<&Ticket> {
        self.active_heavy.as_ref()
    }

    /// Heavy jobs waiting, in queue order.
    pub fn pending_heavy(&self) -> impl Iterator<Item = &Ticket> {
        self.heavy_queue.iter()
    }

    /// Number of smooth jobs running.
    pub fn smooth_in_flight(&self) -> usize {
        self.smooth_in_flight.len()
    }

    /// Whether any job future is still executing.
    pub fn has_work_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    /// Get a mutable reference to the store.
    pub fn store_mut(&mut self) -> &mut TicketStore {
        &mut self.store
    }

    /// Get the handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        self.engine.registry()
    }

    /// Get the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Snapshot for backpressure decisions.
    pub fn summary(&self) -> SchedulerSummary {
        let busy_reason = self.busy.busy_reason();
        SchedulerSummary {
            queue_depth: self.store.queued_jobs().len(),
            heavy_pending: self.heavy_queue.len(),
            active_heavy: self.active_heavy.clone(),
            smooth_in_flight: self.smooth_in_flight.len(),
            host_busy: busy_reason.is_some(),
            busy_reason,
            busy_hold_escalations: self.escalations,
            agents: self.store.agent_counts(),
        }
    }
}
