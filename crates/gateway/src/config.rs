//! Gateway configuration.

use hostgate_execution::SchedulerConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Default directory for state, settings and the audit log.
pub const DEFAULT_STATE_DIR: &str = ".hostgate";

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory holding `jobs.json`, `settings.json` and `audit.jsonl`
    pub state_dir: PathBuf,

    /// Period of the tick loop
    pub tick_interval: Duration,

    /// Suggested re-poll delay for queued jobs
    pub poll_interval_queued: Duration,

    /// Suggested re-poll delay for running jobs
    pub poll_interval_running: Duration,

    /// Save the job table after every change
    pub persist: bool,

    /// Scheduling limits
    pub scheduler: SchedulerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            tick_interval: Duration::from_millis(50),
            poll_interval_queued: Duration::from_millis(2000),
            poll_interval_running: Duration::from_millis(1000),
            persist: true,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Default configuration rooted at `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Set the tick period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the suggested re-poll delays.
    pub fn with_poll_intervals(mut self, queued: Duration, running: Duration) -> Self {
        self.poll_interval_queued = queued;
        self.poll_interval_running = running;
        self
    }

    /// Turn persistence on or off.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Set the scheduling limits.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.state_dir, PathBuf::from(".hostgate"));
        assert!(config.persist);
        assert!(config.poll_interval_running < config.poll_interval_queued);
        assert_eq!(config.scheduler.expiry_window, Duration::from_secs(300));
    }

    #[test]
    fn test_builder() {
        let config = GatewayConfig::new("/tmp/state")
            .with_persist(false)
            .with_tick_interval(Duration::from_millis(10))
            .with_scheduler(SchedulerConfig::new().with_busy_hold_timeout(None));
        assert!(!config.persist);
        assert_eq!(config.tick_interval, Duration::from_millis(10));
        assert!(config.scheduler.busy_hold_timeout.is_none());
    }
}
