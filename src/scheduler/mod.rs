//! Cluster scheduling core.
//!
//! - [`queue`]: priority-ordered admission of pending jobs
//! - [`pool`]: worker registry and liveness bookkeeping
//! - [`resources`]: capacity accounting and admission control
//! - [`progress`]: per-job and per-group progress
//! - [`monitor`]: liveness sweeps and orphan recovery
//! - [`core`]: the state machine that ties them together
//! - [`service`]: the actor that serializes every command through `core`

pub mod core;
pub mod events;
pub mod job;
pub mod monitor;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod resources;
pub mod service;

pub use self::core::{Assignment, CancelOutcome, ClusterSummary, Scheduler};
pub use events::{EventEnvelope, SchedulerEvent};
pub use job::{Job, JobId, JobSpec, JobStatus, Outcome, PayloadRef, Resources, WorkerId};
pub use pool::{WorkerSnapshot, WorkerStatus};
pub use progress::{GroupProgress, ProgressUpdate};
pub use queue::JobQueue;
pub use service::{SchedulerHandle, SchedulerService, WorkerInbox, WorkerInstruction};
