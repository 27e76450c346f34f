use std::time::Duration;

use rand::Rng;

use crate::config::WorkerConfig;

/// Heartbeat timing for a worker: a fixed interval plus random jitter.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSchedule {
    interval: Duration,
    jitter_ms: u64,
}

impl HeartbeatSchedule {
    pub fn new(interval_ms: u64, jitter_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            jitter_ms,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.heartbeat_interval_ms, config.heartbeat_jitter_ms)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delay until the next heartbeat, in `interval..=interval + jitter`.
    pub fn next_delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            return self.interval;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.jitter_ms);
        self.interval + Duration::from_millis(jitter)
    }
}
