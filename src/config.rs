use std::time::Duration;

use crate::scheduler::job::Resources;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Scheduler-side tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum allowed gap between heartbeats before a worker is declared
    /// Offline. Should be at least three heartbeat intervals.
    pub worker_timeout_ms: u64,
    /// How often the fault monitor sweeps for silent workers and expired
    /// cancellations.
    pub liveness_check_interval_ms: u64,
    /// How long a running job may sit in Cancelling before it is
    /// finalized without the worker's acknowledgement.
    pub cancel_grace_ms: u64,
    /// Retry budget for jobs submitted without one.
    pub default_max_retries: u32,
    /// Bound on live (non-terminal) jobs.
    pub max_jobs: usize,
    /// Optional ceiling on total resources allocated across the cluster.
    pub cluster_cap: Option<Resources>,
    /// Depth of the scheduler command channel.
    pub command_buffer: usize,
    /// Depth of the event broadcast channel.
    pub event_buffer: usize,
    /// Terminal jobs older than this are pruned. `None` keeps them.
    pub finished_job_retention_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 5000,
            liveness_check_interval_ms: 1000,
            cancel_grace_ms: 10_000,
            default_max_retries: 3,
            max_jobs: DEFAULT_MAX_JOBS,
            cluster_cap: None,
            command_buffer: 1024,
            event_buffer: 1024,
            finished_job_retention_ms: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_worker_timeout_ms(mut self, ms: u64) -> Self {
        self.worker_timeout_ms = ms;
        self
    }

    pub fn with_liveness_check_interval_ms(mut self, ms: u64) -> Self {
        self.liveness_check_interval_ms = ms;
        self
    }

    pub fn with_cancel_grace_ms(mut self, ms: u64) -> Self {
        self.cancel_grace_ms = ms;
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn with_cluster_cap(mut self, cap: Resources) -> Self {
        self.cluster_cap = Some(cap);
        self
    }

    pub fn with_finished_job_retention_ms(mut self, ms: u64) -> Self {
        self.finished_job_retention_ms = Some(ms);
        self
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn finished_job_retention(&self) -> Option<Duration> {
        self.finished_job_retention_ms.map(Duration::from_millis)
    }

    /// Whether the liveness timeout tolerates at least three missed
    /// heartbeats at the given interval.
    pub fn liveness_margin_ok(&self, heartbeat_interval_ms: u64) -> bool {
        self.worker_timeout_ms >= heartbeat_interval_ms.saturating_mul(3)
    }
}

/// Worker-side tuning.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub heartbeat_interval_ms: u64,
    /// Upper bound of random delay added to each heartbeat so a fleet
    /// started together does not beat in lockstep.
    pub heartbeat_jitter_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            heartbeat_jitter_ms: 100,
        }
    }
}

impl WorkerConfig {
    pub fn new(heartbeat_interval_ms: u64) -> Self {
        Self {
            heartbeat_interval_ms,
            ..Default::default()
        }
    }

    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.heartbeat_jitter_ms = jitter_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.worker_timeout_ms, 5000);
        assert_eq!(cfg.liveness_check_interval_ms, 1000);
        assert_eq!(cfg.cancel_grace_ms, 10_000);
        assert_eq!(cfg.default_max_retries, 3);
        assert_eq!(cfg.max_jobs, 10_000);
        assert!(cfg.cluster_cap.is_none());
        assert!(cfg.finished_job_retention_ms.is_none());
    }

    #[test]
    fn scheduler_config_builders() {
        let cfg = SchedulerConfig::default()
            .with_worker_timeout_ms(300)
            .with_liveness_check_interval_ms(50)
            .with_cancel_grace_ms(200)
            .with_default_max_retries(1)
            .with_max_jobs(8)
            .with_cluster_cap(Resources::new(16, 1024))
            .with_finished_job_retention_ms(60_000);
        assert_eq!(cfg.worker_timeout(), Duration::from_millis(300));
        assert_eq!(cfg.liveness_check_interval(), Duration::from_millis(50));
        assert_eq!(cfg.cancel_grace(), Duration::from_millis(200));
        assert_eq!(cfg.default_max_retries, 1);
        assert_eq!(cfg.max_jobs, 8);
        assert_eq!(cfg.cluster_cap, Some(Resources::new(16, 1024)));
        assert_eq!(
            cfg.finished_job_retention(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn liveness_interval_never_zero() {
        let cfg = SchedulerConfig::default().with_liveness_check_interval_ms(0);
        assert_eq!(cfg.liveness_check_interval(), Duration::from_millis(1));
    }

    #[test]
    fn liveness_margin_requires_three_intervals() {
        let cfg = SchedulerConfig::default().with_worker_timeout_ms(3000);
        assert!(cfg.liveness_margin_ok(1000));
        assert!(cfg.liveness_margin_ok(500));
        assert!(!cfg.liveness_margin_ok(1001));
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.heartbeat_interval_ms, 1000);
        assert_eq!(cfg.heartbeat_jitter_ms, 100);
    }

    #[test]
    fn worker_config_new() {
        let cfg = WorkerConfig::new(250).with_jitter_ms(0);
        assert_eq!(cfg.heartbeat_interval_ms, 250);
        assert_eq!(cfg.heartbeat_jitter_ms, 0);
    }
}
