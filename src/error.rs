use thiserror::Error;

use crate::scheduler::job::{JobId, WorkerId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Worker {0} is offline and must re-register")]
    WorkerOffline(WorkerId),

    /// Raised by the fault monitor for the scheduler core; never returned to API callers.
    #[error("Worker {worker_id} silent for {silent_for_ms}ms")]
    WorkerTimeout { worker_id: WorkerId, silent_for_ms: u64 },

    #[error("Job {job_id} failed permanently: {error}")]
    PermanentFailure { job_id: JobId, error: String },

    #[error("Scheduler is not running")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
