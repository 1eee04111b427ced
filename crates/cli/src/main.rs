//! hostgate CLI - inspect gateway state, control the audit log, run the demo.

mod demo;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostgate_core::{AgentId, JobStatus, SessionId, Tier};
use hostgate_execution::{Scheduler, SchedulerConfig, SnapshotUndo};
use hostgate_gateway::{spawn_tick_loop, Gateway, GatewayConfig, DEFAULT_STATE_DIR};
use hostgate_storage::{read_document, AgentCounts, AuditLog, JsonFileBackend};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hostgate")]
#[command(about = "Tiered command execution gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding job state, settings and the audit log
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the persisted queue and jobs
    Inspect {
        /// Print the status summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Control the audit log
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
    /// Run sample batches through a gateway with demo handlers
    Demo {
        /// Tick period in milliseconds
        #[arg(long, default_value = "20")]
        tick_ms: u64,
        /// Save job state under --state-dir
        #[arg(long)]
        persist: bool,
        /// Seconds the heavy slot may be held for a busy host
        #[arg(long, default_value = "5")]
        busy_hold_secs: u64,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Start recording consumed jobs
    Enable,
    /// Stop recording consumed jobs
    Disable,
    /// Print the last records
    Tail {
        /// Number of records
        #[arg(short, long, default_value = "20")]
        n: usize,
    },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Commands::Inspect { json } => inspect(&cli.state_dir, json).await?,
        Commands::Audit { action } => audit(&cli.state_dir, action).await?,
        Commands::Demo {
            tick_ms,
            persist,
            busy_hold_secs,
        } => {
            let config = GatewayConfig::new(&cli.state_dir)
                .with_persist(persist)
                .with_tick_interval(Duration::from_millis(tick_ms))
                .with_scheduler(
                    SchedulerConfig::new()
                        .with_busy_hold_timeout(Some(Duration::from_secs(busy_hold_secs))),
                );
            run_demo(config).await?;
        }
    }

    Ok(())
}

async fn inspect(state_dir: &Path, json: bool) -> Result<()> {
    let backend = JsonFileBackend::in_dir(state_dir);
    let Some(mut doc) = read_document(&backend).await? else {
        println!("No saved job table in {}", state_dir.display());
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let audit = AuditLog::open(state_dir, SessionId::new()).await;
    println!("hostgate state in {} (saved {})", state_dir.display(), doc.saved_at);
    println!("  Audit log: {}", if audit.is_enabled() { "on" } else { "off" });

    doc.jobs.sort_by_key(|j| j.ticket.seq());
    let queued = doc.jobs.iter().filter(|j| j.status == JobStatus::Queued);
    let heavy = queued.clone().filter(|j| j.tier == Tier::Heavy).count();
    println!("  Queued: {} ({} heavy)", queued.count(), heavy);

    println!("Jobs ({})", doc.jobs.len());
    let mut agents: BTreeMap<&AgentId, AgentCounts> = BTreeMap::new();
    for job in &doc.jobs {
        println!(
            "  {} | {} | {} | {} | {}",
            job.ticket,
            format_status(job.status),
            job.tier,
            job.agent,
            job.label,
        );
        if let Some(error) = &job.error {
            println!("      {}", error);
        }
        let counts = agents.entry(&job.agent).or_default();
        match job.status {
            JobStatus::Queued => counts.queued += 1,
            JobStatus::Running => counts.active += 1,
            _ => counts.completed += 1,
        }
    }
    for (agent, counts) in &agents {
        println!(
            "  {}: {} active, {} queued, {} completed",
            agent, counts.active, counts.queued, counts.completed
        );
    }
    Ok(())
}

async fn audit(state_dir: &Path, action: AuditAction) -> Result<()> {
    let mut log = AuditLog::open(state_dir, SessionId::new()).await;
    match action {
        AuditAction::Enable => {
            log.set_enabled(true).await?;
            println!("Audit log enabled ({})", log.path().display());
        }
        AuditAction::Disable => {
            log.set_enabled(false).await?;
            println!("Audit log disabled");
        }
        AuditAction::Tail { n } => {
            for record in log.read_tail(n).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }
    Ok(())
}

async fn run_demo(config: GatewayConfig) -> Result<()> {
    let host = demo::DemoHost::new();
    let scheduler = Scheduler::new(demo::registry(&host))
        .with_busy_signal(Arc::new(host.busy.clone()))
        .with_undo(Arc::new(SnapshotUndo::new(host.state.clone())));

    let gateway = if config.persist {
        Gateway::open(scheduler, config).await
    } else {
        Gateway::in_memory(scheduler, config)
    };
    let period = gateway.config().tick_interval;
    let gateway = Arc::new(Mutex::new(gateway));
    let ticker = spawn_tick_loop(gateway.clone(), period);

    let mut pending = Vec::new();
    for request in demo::sample_batches() {
        let label = request.label.clone();
        match gateway.lock().await.submit(request).await {
            Ok(response) if response.pending => {
                info!("Submitted '{}' as {}", label, response.ticket);
                pending.push(response.ticket);
            }
            Ok(response) => println!("{}", serde_json::to_string(&response)?),
            Err(e) => println!("'{}' rejected: {}", label, serde_json::to_string(&e)?),
        }
    }

    while !pending.is_empty() {
        tokio::time::sleep(period * 4).await;
        let mut still_pending = Vec::new();
        for ticket in pending {
            let response = gateway.lock().await.poll(&ticket).await;
            match response {
                Ok(response) if response.pending => still_pending.push(ticket),
                Ok(response) => println!("{}", serde_json::to_string(&response)?),
                Err(e) => println!("{}: {}", ticket, serde_json::to_string(&e)?),
            }
        }
        pending = still_pending;
    }
    ticker.abort();

    let gateway = gateway.lock().await;
    println!("{}", serde_json::to_string_pretty(&gateway.status())?);
    println!("Host state: {}", serde_json::to_string(&host.snapshot())?);
    Ok(())
}

fn format_status(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "QUEUED",
        JobStatus::Running => "RUNNING",
        JobStatus::Done => "DONE",
        JobStatus::Failed => "FAILED",
        JobStatus::Cancelled => "CANCELLED",
    }
}
