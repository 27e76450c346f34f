use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::scheduler::job::{JobId, WorkerId};
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::service::SchedulerHandle;

/// What one liveness sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub offline_workers: Vec<WorkerId>,
    pub requeued: Vec<JobId>,
    pub failed: Vec<JobId>,
    pub cancelled: Vec<JobId>,
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.offline_workers.is_empty()
            && self.requeued.is_empty()
            && self.failed.is_empty()
            && self.cancelled.is_empty()
            && self.pruned == 0
    }
}

/// An online worker that went quiet for longer than the liveness timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTimeout {
    pub worker_id: WorkerId,
    pub silent_for_ms: u64,
}

impl From<WorkerTimeout> for SchedulerError {
    fn from(timeout: WorkerTimeout) -> Self {
        SchedulerError::WorkerTimeout {
            worker_id: timeout.worker_id,
            silent_for_ms: timeout.silent_for_ms,
        }
    }
}

/// One signal for every online worker silent for longer than `timeout`.
pub fn detect_timeouts(pool: &WorkerPool, now: Instant, timeout: Duration) -> Vec<WorkerTimeout> {
    pool.silent_workers(now, timeout)
        .into_iter()
        .map(|(worker_id, silent)| WorkerTimeout {
            worker_id,
            silent_for_ms: silent.as_millis() as u64,
        })
        .collect()
}

/// Periodically asks the scheduler to sweep for silent workers and expired
/// cancellations. Runs on its own interval, independent of scheduling ticks.
pub struct FaultMonitor {
    handle: SchedulerHandle,
    interval: Duration,
}

impl FaultMonitor {
    pub fn new(handle: SchedulerHandle, interval: Duration) -> Self {
        Self { handle, interval }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Fault monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.handle.sweep().await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(
                                offline = ?report.offline_workers,
                                requeued = report.requeued.len(),
                                failed = report.failed.len(),
                                cancelled = report.cancelled.len(),
                                pruned = report.pruned,
                                "Liveness sweep recovered state"
                            );
                        }
                        Ok(_) => {}
                        Err(SchedulerError::ChannelClosed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Liveness sweep failed");
                        }
                    }
                }
            }
        }
    }
}
