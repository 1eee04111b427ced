//! In-memory ticket table with expiry and JSON round-tripping.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use hostgate_core::{AgentId, Command, Job, JobStatus, Ticket, Tier, Time};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Result, StoreError};

/// Current version of the persisted document.
pub const STATE_VERSION: u32 = 1;

/// Error recorded on jobs that were running when the process went away.
pub const INTERRUPTED_ERROR: &str = "Interrupted: the gateway restarted while this job was running";

/// Persisted job table (jobs.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    /// Document version
    pub version: u32,
    /// Next ticket sequence number to mint
    pub next_ticket: u64,
    /// When the document was written
    pub saved_at: Time,
    /// Every job in the table
    pub jobs: Vec<Job>,
}

/// Per-agent job counts, derived on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCounts {
    /// Jobs currently running
    pub active: usize,
    /// Jobs waiting to run
    pub queued: usize,
    /// Finished jobs not yet consumed or expired
    pub completed: usize,
}

/// Keyed table of jobs.
///
/// Every mutation marks the table dirty so the persistence driver only
/// writes after something changed.
#[derive(Debug)]
pub struct TicketStore {
    jobs: HashMap<Ticket, Job>,
    next_seq: u64,
    dirty: bool,
}

impl TicketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            next_seq: 1,
            dirty: false,
        }
    }

    /// Insert a queued job under a freshly minted ticket.
    pub fn create_job(
        &mut self,
        agent: AgentId,
        label: impl Into<String>,
        atomic: bool,
        tier: Tier,
        commands: Vec<Command>,
    ) -> Job {
        let ticket = Ticket::from_seq(self.next_seq);
        self.next_seq += 1;

        let job = Job::new(ticket.clone(), agent, label, atomic, tier, commands);
        debug!("Created job {} ({} tier, {} commands)", ticket, tier, job.total());
        self.jobs.insert(ticket, job.clone());
        self.dirty = true;
        job
    }

    /// Look up a job.
    pub fn get_job(&self, ticket: &Ticket) -> Option<&Job> {
        self.jobs.get(ticket)
    }

    /// Look up a job for mutation.
    pub fn get_job_mut(&mut self, ticket: &Ticket) -> Option<&mut Job> {
        let job = self.jobs.get_mut(ticket)?;
        self.dirty = true;
        Some(job)
    }

    /// Remove a job from the table.
    pub fn remove_job(&mut self, ticket: &Ticket) -> Option<Job> {
        let job = self.jobs.remove(ticket)?;
        self.dirty = true;
        Some(job)
    }

    /// Move a job along its lifecycle, stamping `started_at` and
    /// `completed_at` as it goes.
    pub fn transition(&mut self, ticket: &Ticket, next: JobStatus) -> Result<&mut Job> {
        let job = self
            .jobs
            .get_mut(ticket)
            .ok_or_else(|| StoreError::NotFound(ticket.clone()))?;

        if !job.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                ticket: ticket.clone(),
                from: job.status,
                to: next,
            });
        }

        let now = chrono::Utc::now();
        job.status = next;
        if next == JobStatus::Running {
            job.started_at = Some(now);
        }
        if next.is_terminal() {
            job.completed_at = Some(now);
        }
        self.dirty = true;
        Ok(job)
    }

    /// Queued jobs in submission order.
    pub fn queued_jobs(&self) -> Vec<&Job> {
        let mut queued: Vec<_> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();
        queued.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.ticket.seq().cmp(&b.ticket.seq()))
        });
        queued
    }

    /// All jobs, in no particular order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Number of jobs in the table.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Sequence number the next ticket will get.
    pub fn next_ticket_seq(&self) -> u64 {
        self.next_seq
    }

    /// Remove terminal jobs that finished more than `window` ago.
    pub fn clean_expired(&mut self, window: Duration) -> Vec<Job> {
        self.clean_expired_at(window, chrono::Utc::now())
    }

    /// [`clean_expired`](Self::clean_expired) against an explicit clock.
    pub fn clean_expired_at(&mut self, window: Duration, now: Time) -> Vec<Job> {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return Vec::new();
        };
        let Some(cutoff) = now.checked_sub_signed(window) else {
            return Vec::new();
        };

        let expired: Vec<Ticket> = self
            .jobs
            .values()
            .filter(|j| j.is_terminal() && j.completed_at.is_some_and(|at| at < cutoff))
            .map(|j| j.ticket.clone())
            .collect();

        if expired.is_empty() {
            return Vec::new();
        }

        debug!("Expiring {} finished jobs", expired.len());
        self.dirty = true;
        expired
            .iter()
            .filter_map(|t| self.jobs.remove(t))
            .collect()
    }

    /// Active/queued/completed counts for every agent with jobs.
    pub fn agent_counts(&self) -> BTreeMap<AgentId, AgentCounts> {
        let mut counts: BTreeMap<AgentId, AgentCounts> = BTreeMap::new();
        for job in self.jobs.values() {
            tally(counts.entry(job.agent.clone()).or_default(), job.status);
        }
        counts
    }

    /// Counts for one agent.
    pub fn agent_counts_for(&self, agent: &AgentId) -> AgentCounts {
        let mut counts = AgentCounts::default();
        for job in self.jobs.values().filter(|j| &j.agent == agent) {
            tally(&mut counts, job.status);
        }
        counts
    }

    /// Whether the table changed since the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty marker after a successful save.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Snapshot the table as a persistence document.
    pub fn to_document(&self) -> StateDocument {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.ticket.seq());
        StateDocument {
            version: STATE_VERSION,
            next_ticket: self.next_seq,
            saved_at: chrono::Utc::now(),
            jobs,
        }
    }

    /// Serialize the table.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    /// Rebuild a table from a document.
    ///
    /// Running jobs cannot be resumed; they come back failed with
    /// [`INTERRUPTED_ERROR`].
    pub fn from_document(doc: StateDocument) -> Result<Self> {
        if doc.version != STATE_VERSION {
            return Err(StoreError::UnsupportedVersion(doc.version));
        }

        let now = chrono::Utc::now();
        let mut next_seq = doc.next_ticket.max(1);
        let mut jobs = HashMap::with_capacity(doc.jobs.len());
        let mut interrupted = 0usize;

        for mut job in doc.jobs {
            if let Some(seq) = job.ticket.seq() {
                next_seq = next_seq.max(seq + 1);
            }

            match job.status {
                JobStatus::Running => {
                    job.status = JobStatus::Failed;
                    job.error = Some(INTERRUPTED_ERROR.to_string());
                    job.completed_at = Some(now);
                    interrupted += 1;
                }
                status if status.is_terminal() => {
                    job.completed_at.get_or_insert(now);
                }
                _ => {
                    job.completed_at = None;
                }
            }

            jobs.insert(job.ticket.clone(), job);
        }

        if interrupted > 0 {
            warn!("{} running jobs were interrupted by a restart", interrupted);
        }
        info!("Restored {} jobs, next ticket {}", jobs.len(), next_seq);

        Ok(Self {
            jobs,
            next_seq,
            dirty: interrupted > 0,
        })
    }

    /// Parse a serialized table.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: StateDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new()
    }
}

fn tally(counts: &mut AgentCounts, status: JobStatus) {
    match status {
        JobStatus::Queued => counts.queued += 1,
        JobStatus::Running => counts.active += 1,
        _ => counts.completed += 1,
    }
}
