use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{JobId, Resources, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Worker state tracking
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub capacity: Resources,
    pub status: WorkerStatus,
    pub running_jobs: BTreeSet<JobId>,
    pub last_heartbeat: Instant,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(id: WorkerId, capacity: Resources) -> Self {
        Self {
            id,
            capacity,
            status: WorkerStatus::Idle,
            running_jobs: BTreeSet::new(),
            last_heartbeat: Instant::now(),
            registered_at: Utc::now(),
        }
    }

    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }

    pub fn is_online(&self) -> bool {
        self.status != WorkerStatus::Offline
    }

    fn refresh_status(&mut self) {
        if self.status == WorkerStatus::Offline {
            return;
        }
        self.status = if self.running_jobs.is_empty() {
            WorkerStatus::Idle
        } else {
            WorkerStatus::Busy
        };
    }
}

/// Point-in-time view of a worker for callers outside the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub capacity: Resources,
    pub allocated: Resources,
    pub status: WorkerStatus,
    pub running_jobs: Vec<JobId>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerSnapshot {
    pub fn new(worker: &Worker, allocated: Resources) -> Self {
        Self {
            id: worker.id,
            capacity: worker.capacity,
            allocated,
            status: worker.status,
            running_jobs: worker.running_jobs.iter().copied().collect(),
            registered_at: worker.registered_at,
        }
    }
}

/// Result of (re-)registering a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Status before registration, `None` for a first-time worker.
    pub previous: Option<WorkerStatus>,
    /// Jobs a still-online worker had recorded when it re-registered. These
    /// attempts are lost and the caller must recover them.
    pub stale_jobs: Vec<JobId>,
}

/// Registry and liveness bookkeeping for workers.
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: BTreeMap<WorkerId, Worker>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or reset a worker as Idle with no running jobs.
    pub fn register(&mut self, worker_id: WorkerId, capacity: Resources) -> Registration {
        let previous = self.workers.insert(worker_id, Worker::new(worker_id, capacity));
        let registration = match previous {
            None => Registration {
                previous: None,
                stale_jobs: Vec::new(),
            },
            // Offline workers hold nothing; their jobs were recovered when
            // they were marked offline.
            Some(old) if old.status == WorkerStatus::Offline => Registration {
                previous: Some(WorkerStatus::Offline),
                stale_jobs: Vec::new(),
            },
            Some(old) => Registration {
                previous: Some(old.status),
                stale_jobs: old.running_jobs.into_iter().collect(),
            },
        };
        tracing::info!(worker_id, %capacity, previous = ?registration.previous, "Worker registered");
        registration
    }

    /// Refresh a worker's liveness timestamp.
    pub fn heartbeat(&mut self, worker_id: WorkerId) -> Result<()> {
        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound(worker_id))?;
        if worker.status == WorkerStatus::Offline {
            return Err(SchedulerError::WorkerOffline(worker_id));
        }
        worker.update_heartbeat();
        Ok(())
    }

    /// Flip a worker to Offline and hand back the jobs it was running.
    pub fn mark_offline(&mut self, worker_id: WorkerId) -> Result<Vec<JobId>> {
        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound(worker_id))?;
        worker.status = WorkerStatus::Offline;
        let orphaned = std::mem::take(&mut worker.running_jobs);
        tracing::warn!(worker_id, orphaned = orphaned.len(), "Worker marked offline");
        Ok(orphaned.into_iter().collect())
    }

    /// Record a job as running on a worker.
    pub fn assign(&mut self, worker_id: WorkerId, job_id: JobId) -> Result<()> {
        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound(worker_id))?;
        if worker.status == WorkerStatus::Offline {
            return Err(SchedulerError::WorkerOffline(worker_id));
        }
        worker.running_jobs.insert(job_id);
        worker.refresh_status();
        Ok(())
    }

    /// Forget a job on a worker. Returns whether the worker was running it.
    pub fn release(&mut self, worker_id: WorkerId, job_id: &JobId) -> bool {
        match self.workers.get_mut(&worker_id) {
            Some(worker) => {
                let removed = worker.running_jobs.remove(job_id);
                worker.refresh_status();
                removed
            }
            None => false,
        }
    }

    pub fn get(&self, worker_id: WorkerId) -> Option<&Worker> {
        self.workers.get(&worker_id)
    }

    /// All workers in ascending id order.
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    /// Workers that are not Offline, in ascending id order.
    pub fn online(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values().filter(|w| w.is_online())
    }

    /// Online workers whose last heartbeat is older than `timeout`.
    pub fn silent_workers(&self, now: Instant, timeout: Duration) -> Vec<(WorkerId, Duration)> {
        self.online()
            .filter_map(|w| {
                let silent = w.silent_for(now);
                (silent > timeout).then_some((w.id, silent))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
