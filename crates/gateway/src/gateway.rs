//! The gateway facade: submit, poll, cancel and status over one scheduler.
//!
//! The gateway owns the scheduler, the persistence backend and the audit
//! log. It is shared by the transport and the tick loop behind a
//! `tokio::sync::Mutex`, so every operation sees a consistent store.

use hostgate_core::{AgentId, Job, SessionId, Ticket};
use hostgate_execution::{Scheduler, SchedulerSummary, TickReport};
use hostgate_storage::{load_store, save_store, AuditLog, JsonFileBackend, StateBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::{CancelResponse, GatewayConfig, GatewayError, PollResponse, SubmitRequest};

/// Status summary for backpressure decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Gateway session stamped on audit records
    pub session: String,
    /// Whether consumed jobs are being audited
    pub audit_log_enabled: bool,
    /// Scheduler counters
    #[serde(flatten)]
    pub scheduler: SchedulerSummary,
}

/// Caller-facing gateway.
pub struct Gateway {
    scheduler: Scheduler,
    backend: Option<Arc<dyn StateBackend>>,
    audit: Option<AuditLog>,
    config: GatewayConfig,
    session: SessionId,
}

impl Gateway {
    /// Gateway without persistence or audit log.
    ///
    /// `config.scheduler` replaces whatever limits `scheduler` was built with.
    pub fn in_memory(scheduler: Scheduler, config: GatewayConfig) -> Self {
        if scheduler.config() != &config.scheduler {
            debug!("Scheduler limits replaced by gateway config: {:?}", config.scheduler);
        }
        Self {
            scheduler: scheduler.with_config(config.scheduler),
            backend: None,
            audit: None,
            config,
            session: SessionId::new(),
        }
    }

    /// Gateway rooted at `config.state_dir`: restores the saved job table
    /// (when persistence is on) and opens the audit log.
    pub async fn open(scheduler: Scheduler, config: GatewayConfig) -> Self {
        let mut gateway = if config.persist {
            let backend = Arc::new(JsonFileBackend::in_dir(&config.state_dir));
            Self::with_backend(scheduler, backend, config).await
        } else {
            Self::in_memory(scheduler, config)
        };
        let audit = AuditLog::open(&gateway.config.state_dir, gateway.session).await;
        gateway.audit = Some(audit);
        info!(
            "Gateway {} opened in {}",
            gateway.session,
            gateway.config.state_dir.display()
        );
        gateway
    }

    /// Gateway persisting to `backend`, restoring whatever it holds.
    pub async fn with_backend(
        scheduler: Scheduler,
        backend: Arc<dyn StateBackend>,
        config: GatewayConfig,
    ) -> Self {
        let store = load_store(backend.as_ref()).await;
        let mut gateway = Self::in_memory(scheduler.with_store(store), config);
        gateway.backend = Some(backend);
        gateway
    }

    /// Attach an audit log.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Submit a batch.
    ///
    /// Instant batches run before this returns; the response is final and
    /// the job is already consumed. Other batches get a pending response
    /// to poll.
    pub async fn submit(&mut self, request: SubmitRequest) -> Result<PollResponse, GatewayError> {
        let agent = request.agent.unwrap_or_else(AgentId::anonymous);
        let receipt = self
            .scheduler
            .submit(agent, request.label, request.atomic, request.commands)
            .await?;

        let response = if receipt.inline {
            self.consume(&receipt.job.ticket).await;
            PollResponse::finished(&receipt.job)
        } else {
            self.pending_response(&receipt.job)
        };
        self.persist_if_dirty().await;
        Ok(response)
    }

    /// Report on a job. The first poll that sees it finished consumes it.
    pub async fn poll(&mut self, ticket: &Ticket) -> Result<PollResponse, GatewayError> {
        let Some(job) = self.scheduler.store().get_job(ticket) else {
            debug!("Poll for unknown ticket {}", ticket);
            return Err(hostgate_execution::SchedulerError::NotFound(ticket.clone()).into());
        };
        if !job.is_terminal() {
            return Ok(self.pending_response(job));
        }

        let Some(job) = self.consume(ticket).await else {
            return Err(hostgate_execution::SchedulerError::NotFound(ticket.clone()).into());
        };
        self.persist_if_dirty().await;
        Ok(PollResponse::finished(&job))
    }

    /// Cancel a queued job. `requester` of `None` cancels on anyone's behalf.
    pub async fn cancel(
        &mut self,
        ticket: &Ticket,
        requester: Option<&AgentId>,
    ) -> Result<CancelResponse, GatewayError> {
        let job = self.scheduler.cancel(ticket, requester)?;
        self.persist_if_dirty().await;
        Ok(CancelResponse::for_job(&job))
    }

    /// Queue and host summary.
    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            session: self.session.to_string(),
            audit_log_enabled: self.audit.as_ref().is_some_and(AuditLog::is_enabled),
            scheduler: self.scheduler.summary(),
        }
    }

    /// Advance the scheduler one cycle, audit what expired and save.
    pub async fn tick(&mut self) -> TickReport {
        let report = self.scheduler.tick();
        if !report.expired.is_empty() {
            debug!("Expired {} unpolled jobs", report.expired.len());
            if let Some(audit) = &self.audit {
                for job in &report.expired {
                    audit.record(job).await;
                }
            }
        }
        self.persist_if_dirty().await;
        report
    }

    /// Save the job table now.
    pub async fn persist(&mut self) -> Result<(), GatewayError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        save_store(backend.as_ref(), self.scheduler.store_mut()).await?;
        Ok(())
    }

    /// Turn the audit log on or off, persisting the choice.
    pub async fn set_audit_enabled(&mut self, enabled: bool) -> Result<(), GatewayError> {
        match &mut self.audit {
            Some(audit) => Ok(audit.set_enabled(enabled).await?),
            None => {
                warn!("Gateway has no audit log to {}", if enabled { "enable" } else { "disable" });
                Ok(())
            }
        }
    }

    /// Get the scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Get the scheduler for mutation.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Get the audit log.
    pub fn audit(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    /// Get the configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Session id of this gateway instance.
    pub fn session(&self) -> SessionId {
        self.session
    }

    fn pending_response(&self, job: &Job) -> PollResponse {
        match self.scheduler.queue_position(&job.ticket) {
            Some(position) => PollResponse::queued(
                job,
                position,
                self.scheduler.blocked_by(&job.ticket),
                self.config.poll_interval_queued,
            ),
            None => PollResponse::running(job, self.config.poll_interval_running),
        }
    }

    async fn consume(&mut self, ticket: &Ticket) -> Option<Job> {
        let job = self.scheduler.store_mut().remove_job(ticket)?;
        if let Some(audit) = &self.audit {
            audit.record(&job).await;
        }
        debug!("Consumed job {} ({})", ticket, job.status);
        Some(job)
    }

    async fn persist_if_dirty(&mut self) {
        if !self.scheduler.store().is_dirty() {
            return;
        }
        if let Err(e) = self.persist().await {
            warn!("Could not save job table: {}", e);
        }
    }
}

/// Drive `gateway.tick()` every `period` until the task is aborted.
pub fn spawn_tick_loop(gateway: Arc<Mutex<Gateway>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let report = gateway.lock().await.tick().await;
            if !report.is_idle() {
                trace!(
                    "Tick: {} dispatched, {} expired",
                    report.dispatched.len(),
                    report.expired.len()
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error_codes, ErrorKind, CANCELLED_MESSAGE};
    use async_trait::async_trait;
    use hostgate_core::{CommandOutcome, JobStatus, Tier};
    use hostgate_execution::{
        BusyFlag, CommandHandler, CommandRequest, HandlerRegistry, SchedulerConfig, SnapshotUndo,
    };
    use hostgate_storage::{MemoryBackend, INTERRUPTED_ERROR};
    use serde_json::{json, Value};

    /// Appends `params.value` to a shared list; fails when `params.fail` is set.
    struct Push {
        name: &'static str,
        tier: Tier,
        state: Arc<std::sync::Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl CommandHandler for Push {
        fn name(&self) -> &str {
            self.name
        }
        fn tier(&self) -> Tier {
            self.tier
        }
        async fn execute(&self, params: &Value) -> Result<CommandOutcome, anyhow::Error> {
            if params["fail"].as_bool().unwrap_or(false) {
                return Ok(CommandOutcome::failed("asked to fail"));
            }
            let value = params["value"].as_i64().unwrap_or(0);
            self.state.lock().unwrap().push(value);
            Ok(CommandOutcome::ok(json!({ "pushed": value })))
        }
    }

    fn scheduler(state: &Arc<std::sync::Mutex<Vec<i64>>>) -> Scheduler {
        let handler = |name: &'static str, tier: Tier| Push {
            name,
            tier,
            state: state.clone(),
        };
        let registry = HandlerRegistry::builder()
            .register(handler("peek", Tier::Instant))
            .register(handler("push", Tier::Smooth))
            .register(handler("rebuild", Tier::Heavy))
            .build();
        Scheduler::new(registry).with_undo(Arc::new(SnapshotUndo::new(state.clone())))
    }

    fn config() -> GatewayConfig {
        GatewayConfig::default().with_persist(false)
    }

    fn push(value: i64) -> CommandRequest {
        CommandRequest::new("push", json!({ "value": value }))
    }

    #[test]
    fn test_gateway_config_controls_scheduling() {
        let state = Arc::default();
        let own = SchedulerConfig::new().with_busy_hold_timeout(None);
        let wanted = SchedulerConfig::new().with_busy_hold_timeout(Some(Duration::from_secs(5)));

        let gateway = Gateway::in_memory(
            scheduler(&state).with_config(own),
            config().with_scheduler(wanted),
        );

        assert_eq!(gateway.scheduler().config(), &wanted);
        assert_eq!(gateway.config().scheduler, wanted);
    }

    #[tokio::test]
    async fn test_instant_submit_is_final_and_consumed() {
        let state = Arc::default();
        let mut gateway = Gateway::in_memory(scheduler(&state), config());

        let response = gateway
            .submit(SubmitRequest::new(vec![CommandRequest::new("peek", json!({"value": 7}))]))
            .await
            .unwrap();
        assert!(response.success);
        assert!(!response.pending);
        assert_eq!(response.tier, Tier::Instant);
        assert_eq!(response.results[0].data["pushed"], 7);
        assert_eq!(response.agent, AgentId::anonymous());

        let err = gateway.poll(&response.ticket).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_smooth_lifecycle() {
        let state = Arc::default();
        let mut gateway = Gateway::in_memory(scheduler(&state), config());

        let response = gateway
            .submit(SubmitRequest::new(vec![push(1), push(2)]).agent("a").label("two"))
            .await
            .unwrap();
        assert!(response.pending);
        assert_eq!(response.status, JobStatus::Queued);
        assert_eq!(response.position, Some(0));
        assert_eq!(response.poll_after_ms, Some(2000));
        let ticket = response.ticket;

        gateway.tick().await;
        let done = gateway.poll(&ticket).await.unwrap();
        assert!(done.success);
        assert_eq!(done.results.len(), 2);
        assert_eq!(done.label, "two");
        assert_eq!(*state.lock().unwrap(), vec![1, 2]);

        let err = gateway.poll(&ticket).await.unwrap_err();
        assert_eq!(err.code, error_codes::RESOURCE_NOT_FOUND);
        assert_eq!(err.message, format!("Ticket '{ticket}' not found or expired"));
    }

    #[tokio::test]
    async fn test_atomic_failure_reverts_host_state() {
        let state = Arc::new(std::sync::Mutex::new(vec![0]));
        let mut gateway = Gateway::in_memory(scheduler(&state), config());

        let ticket = gateway
            .submit(
                SubmitRequest::new(vec![
                    push(1),
                    push(2),
                    CommandRequest::new("push", json!({ "fail": true })),
                ])
                .atomic(true),
            )
            .await
            .unwrap()
            .ticket;
        gateway.tick().await;

        let response = gateway.poll(&ticket).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.status, JobStatus::Failed);
        assert_eq!(response.failed_at_command, Some(2));
        assert_eq!(response.rolled_back, Some(true));
        assert_eq!(response.results.len(), 3);
        assert!(response.error.unwrap().contains("all changes rolled back"));
        assert_eq!(*state.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_queued_heavy_positions() {
        let state = Arc::default();
        let mut gateway = Gateway::in_memory(scheduler(&state), config());
        let rebuild = || SubmitRequest::new(vec![CommandRequest::new("rebuild", json!({}))]);

        let first = gateway.submit(rebuild()).await.unwrap();
        let second = gateway.submit(rebuild()).await.unwrap();
        let smooth = gateway.submit(SubmitRequest::new(vec![push(1)])).await.unwrap();
        assert_eq!(first.position, Some(0));
        assert_eq!(second.position, Some(1));
        assert_eq!(smooth.position, Some(2));

        let status = gateway.status();
        assert_eq!(status.scheduler.heavy_pending, 2);
        assert_eq!(status.scheduler.queue_depth, 3);
    }

    #[tokio::test]
    async fn test_blocked_by_reported_for_disruptive_jobs() {
        struct Reload;

        #[async_trait]
        impl CommandHandler for Reload {
            fn name(&self) -> &str {
                "reload"
            }
            fn tier(&self) -> Tier {
                Tier::Heavy
            }
            fn causes_domain_reload(&self) -> bool {
                true
            }
            async fn execute(&self, _params: &Value) -> Result<CommandOutcome, anyhow::Error> {
                Ok(CommandOutcome::ok(Value::Null))
            }
        }

        let busy = BusyFlag::new();
        let scheduler = Scheduler::new(HandlerRegistry::builder().register(Reload).build())
            .with_busy_signal(Arc::new(busy.clone()));
        let mut gateway = Gateway::in_memory(scheduler, config());
        busy.set(Some(hostgate_execution::BlockedBy::DomainReload));

        let ticket = gateway
            .submit(SubmitRequest::new(vec![CommandRequest::new("reload", json!({}))]))
            .await
            .unwrap()
            .ticket;
        gateway.tick().await;
        let response = gateway.poll(&ticket).await.unwrap();
        assert_eq!(response.status, JobStatus::Queued);
        assert_eq!(response.blocked_by, Some(hostgate_execution::BlockedBy::DomainReload));

        busy.set(None);
        gateway.tick().await;
        assert!(gateway.poll(&ticket).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_cancel_then_poll() {
        let state = Arc::default();
        let mut gateway = Gateway::in_memory(scheduler(&state), config());
        let ticket = gateway
            .submit(SubmitRequest::new(vec![push(1)]).agent("owner"))
            .await
            .unwrap()
            .ticket;

        let err = gateway
            .cancel(&ticket, Some(&AgentId::new("other")))
            .await
            .unwrap_err();
        assert_eq!(err.code, error_codes::NOT_OWNER);

        let response = gateway.cancel(&ticket, Some(&AgentId::new("owner"))).await.unwrap();
        assert_eq!(response.status, JobStatus::Cancelled);

        gateway.tick().await;
        let polled = gateway.poll(&ticket).await.unwrap();
        assert!(!polled.success);
        assert_eq!(polled.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(state.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_validation_errors() {
        let state = Arc::default();
        let mut gateway = Gateway::in_memory(scheduler(&state), config());

        let err = gateway.submit(SubmitRequest::new(vec![])).await.unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);

        let err = gateway
            .submit(SubmitRequest::new(vec![push(1), CommandRequest::new("nope", json!({}))]))
            .await
            .unwrap_err();
        assert_eq!(err.data.unwrap()["index"], 1);
        assert_eq!(gateway.status().scheduler.queue_depth, 0);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let state = Arc::default();
        let backend = Arc::new(MemoryBackend::new());

        let (queued, running) = {
            let mut gateway =
                Gateway::with_backend(scheduler(&state), backend.clone(), config()).await;
            let rebuild = || SubmitRequest::new(vec![CommandRequest::new("rebuild", json!({}))]);
            let queued = gateway.submit(rebuild()).await.unwrap().ticket;
            let running = gateway.submit(SubmitRequest::new(vec![push(1)])).await.unwrap().ticket;
            assert!(backend.document().await.unwrap().contains(queued.as_str()));
            (queued, running)
        };

        // Simulate a crash while the smooth job was executing.
        let document = backend.document().await.unwrap();
        let mut value: Value = serde_json::from_str(&document).unwrap();
        for job in value["jobs"].as_array_mut().unwrap() {
            if job["ticket"] == running.as_str() {
                job["status"] = json!("running");
            }
        }
        let backend = Arc::new(MemoryBackend::with_document(value.to_string()));

        let mut gateway = Gateway::with_backend(scheduler(&state), backend.clone(), config()).await;
        assert_eq!(gateway.scheduler().pending_heavy().collect::<Vec<_>>(), vec![&queued]);

        let interrupted = gateway.poll(&running).await.unwrap();
        assert_eq!(interrupted.status, JobStatus::Failed);
        assert_eq!(interrupted.error.as_deref(), Some(INTERRUPTED_ERROR));

        let next = gateway.submit(SubmitRequest::new(vec![push(2)])).await.unwrap().ticket;
        assert_ne!(next, queued);
        assert_ne!(next, running);

        gateway.tick().await;
        assert!(gateway.poll(&queued).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_audit_records_consumed_and_expired_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::default();
        let mut gateway = Gateway::open(scheduler(&state), GatewayConfig::new(dir.path())).await;
        assert!(!gateway.status().audit_log_enabled);
        gateway.set_audit_enabled(true).await.unwrap();

        gateway
            .submit(SubmitRequest::new(vec![CommandRequest::new("peek", json!({}))]).agent("a"))
            .await
            .unwrap();

        let ticket = gateway.submit(SubmitRequest::new(vec![push(1)])).await.unwrap().ticket;
        gateway.tick().await;
        let long_ago = chrono::Utc::now() - chrono::Duration::hours(1);
        gateway
            .scheduler_mut()
            .store_mut()
            .get_job_mut(&ticket)
            .unwrap()
            .completed_at = Some(long_ago);
        let report = gateway.tick().await;
        assert_eq!(report.expired.len(), 1);

        let records = gateway.audit().unwrap().read_tail(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].agent, AgentId::new("a"));
        assert_eq!(records[1].ticket, ticket);
        assert_eq!(records[1].session, gateway.session().to_string());

        // Settings and state outlive the gateway.
        drop(gateway);
        let gateway = Gateway::open(scheduler(&state), GatewayConfig::new(dir.path())).await;
        assert!(gateway.status().audit_log_enabled);
        assert!(dir.path().join(hostgate_storage::STATE_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_tick_loop_drives_jobs() {
        let state = Arc::default();
        let gateway = Arc::new(Mutex::new(Gateway::in_memory(scheduler(&state), config())));
        let ticket = gateway
            .lock()
            .await
            .submit(SubmitRequest::new(vec![push(5)]))
            .await
            .unwrap()
            .ticket;

        let handle = spawn_tick_loop(gateway.clone(), Duration::from_millis(5));
        let mut response = None;
        for _ in 0..200 {
            let polled = gateway.lock().await.poll(&ticket).await.unwrap();
            if !polled.pending {
                response = Some(polled);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        assert!(response.unwrap().success);
        assert_eq!(*state.lock().unwrap(), vec![5]);
    }
}
