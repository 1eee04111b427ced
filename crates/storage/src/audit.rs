//! Append-only audit log of finished jobs.
//!
//! One JSON line per terminal job. The log is off unless enabled, and the
//! enable flag survives restarts in `settings.json`. Nothing here may fail
//! a caller: write errors are traced and dropped.

use std::path::{Path, PathBuf};

use hostgate_core::{AgentId, Job, JobStatus, SessionId, Ticket, Tier, Time};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace};

use super::json_storage::read_json;
use super::Result;

/// File name of the audit log inside the state directory.
pub const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// File name of the persisted gateway settings.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Errors longer than this are cut before logging.
pub const MAX_ERROR_CHARS: usize = 200;

/// Persisted gateway settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Whether finished jobs are appended to the audit log
    #[serde(default)]
    pub audit_log_enabled: bool,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Gateway process that ran the job
    pub session: String,
    /// Job ticket
    pub ticket: Ticket,
    /// Owning agent
    pub agent: AgentId,
    /// Job label
    pub label: String,
    /// Batch tier
    pub tier: Tier,
    /// Final status
    pub status: JobStatus,
    /// Whether the batch was atomic
    pub atomic: bool,
    /// Submission time
    pub created_at: Time,
    /// Completion time
    pub completed_at: Option<Time>,
    /// Tools in execution order
    pub tools: Vec<String>,
    /// Truncated error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Summarize a finished job.
    pub fn from_job(job: &Job, session: SessionId) -> Self {
        Self {
            session: session.to_string(),
            ticket: job.ticket.clone(),
            agent: job.agent.clone(),
            label: job.label.clone(),
            tier: job.tier,
            status: job.status,
            atomic: job.atomic,
            created_at: job.created_at,
            completed_at: job.completed_at,
            tools: job.tool_names(),
            error: job.error.as_deref().map(truncate_error),
        }
    }
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_CHARS {
        return error.to_string();
    }
    let mut cut: String = error.chars().take(MAX_ERROR_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Audit log sink.
pub struct AuditLog {
    log_path: PathBuf,
    settings_path: PathBuf,
    session: SessionId,
    enabled: bool,
}

impl AuditLog {
    /// Open the log in `dir`, reading the persisted enable flag.
    ///
    /// Unreadable settings count as disabled.
    pub async fn open(dir: impl AsRef<Path>, session: SessionId) -> Self {
        let dir = dir.as_ref();
        let settings_path = dir.join(SETTINGS_FILE_NAME);
        let settings = match read_json::<GatewaySettings>(&settings_path).await {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                trace!("Ignoring unreadable gateway settings: {}", e);
                GatewaySettings::default()
            }
        };

        Self {
            log_path: dir.join(AUDIT_FILE_NAME),
            settings_path,
            session,
            enabled: settings.audit_log_enabled,
        }
    }

    /// Whether records are being written.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Session stamped on records.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Turn logging on or off and persist the choice.
    pub async fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let settings = GatewaySettings {
            audit_log_enabled: enabled,
        };
        let json = serde_json::to_string_pretty(&settings)?;
        fs::write(&self.settings_path, json.as_bytes()).await?;
        self.enabled = enabled;
        info!("Audit log {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Append a record for a finished job. No-op when disabled.
    pub async fn record(&self, job: &Job) {
        if !self.enabled {
            return;
        }
        let record = AuditRecord::from_job(job, self.session);
        if let Err(e) = self.append(&record).await {
            trace!("Audit write for {} failed: {}", job.ticket, e);
        } else {
            debug!("Audited job {}", job.ticket);
        }
    }

    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Last `n` records, oldest first. Lines that fail to parse are skipped.
    pub async fn read_tail(&self, n: usize) -> Result<Vec<AuditRecord>> {
        let content = match fs::read_to_string(&self.log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records: Vec<AuditRecord> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let skip = records.len().saturating_sub(n);
        Ok(records.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgate_core::Command;
    use serde_json::json;

    fn finished_job(seq: u64, error: Option<String>) -> Job {
        let mut job = Job::new(
            Ticket::from_seq(seq),
            AgentId::new("agent"),
            "label",
            true,
            Tier::Heavy,
            vec![
                Command::new("create", json!({}), Tier::Smooth, false),
                Command::new("compile", json!({}), Tier::Heavy, true),
            ],
        );
        job.status = if error.is_some() { JobStatus::Failed } else { JobStatus::Done };
        job.error = error;
        job.completed_at = Some(chrono::Utc::now());
        job
    }

    #[tokio::test]
    async fn test_disabled_by_default_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path(), SessionId::new()).await;
        assert!(!log.is_enabled());

        log.record(&finished_job(1, None)).await;
        assert!(!log.path().exists());
    }

    #[tokio::test]
    async fn test_enable_flag_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::open(dir.path(), SessionId::new()).await;
        log.set_enabled(true).await.unwrap();

        let reopened = AuditLog::open(dir.path(), SessionId::new()).await;
        assert!(reopened.is_enabled());
    }

    #[tokio::test]
    async fn test_records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();
        let mut log = AuditLog::open(dir.path(), session).await;
        log.set_enabled(true).await.unwrap();

        log.record(&finished_job(1, None)).await;
        log.record(&finished_job(2, Some("x".repeat(500)))).await;

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(content.lines().count(), 2);

        let records = log.read_tail(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ticket, Ticket::from_seq(1));
        assert_eq!(records[0].tools, vec!["create", "compile"]);
        assert_eq!(records[0].session, session.to_string());
        assert_eq!(records[1].status, JobStatus::Failed);
        assert_eq!(
            records[1].error.as_ref().unwrap().chars().count(),
            MAX_ERROR_CHARS + 3
        );

        let tail = log.read_tail(1).await.unwrap();
        assert_eq!(tail[0].ticket, Ticket::from_seq(2));
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::open(dir.path(), SessionId::new()).await;
        log.set_enabled(true).await.unwrap();
        // A directory where the log file should be makes every append fail.
        tokio::fs::create_dir_all(log.path()).await.unwrap();

        log.record(&finished_job(1, None)).await;
        assert!(log.path().is_dir());
    }
}
