use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::scheduler::job::{JobId, Resources, WorkerId};

/// State change published for external listeners (audit, persistence,
/// dashboards). The scheduler never waits on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    JobSubmitted {
        job_id: JobId,
        priority: i32,
        requirements: Resources,
        group: Option<String>,
    },
    JobAssigned {
        job_id: JobId,
        worker_id: WorkerId,
        attempt: u32,
    },
    JobRequeued {
        job_id: JobId,
        retries: u32,
        reason: String,
    },
    JobCompleted {
        job_id: JobId,
        worker_id: WorkerId,
        detail: Option<String>,
    },
    JobFailed {
        job_id: JobId,
        retries: u32,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },
    WorkerRegistered {
        worker_id: WorkerId,
        capacity: Resources,
    },
    WorkerOffline {
        worker_id: WorkerId,
        orphaned: usize,
    },
}

impl SchedulerEvent {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            SchedulerEvent::JobSubmitted { job_id, .. }
            | SchedulerEvent::JobAssigned { job_id, .. }
            | SchedulerEvent::JobRequeued { job_id, .. }
            | SchedulerEvent::JobCompleted { job_id, .. }
            | SchedulerEvent::JobFailed { job_id, .. }
            | SchedulerEvent::JobCancelled { job_id } => Some(*job_id),
            SchedulerEvent::WorkerRegistered { .. } | SchedulerEvent::WorkerOffline { .. } => None,
        }
    }

    /// Whether this event moves a job into a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::JobCompleted { .. }
                | SchedulerEvent::JobFailed { .. }
                | SchedulerEvent::JobCancelled { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SchedulerEvent,
}

/// Fan-out of scheduler events over a bounded broadcast channel. Slow
/// subscribers lag and lose events rather than stalling the scheduler.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(EventEnvelope {
            at: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}
