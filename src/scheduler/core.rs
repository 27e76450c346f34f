//! The authoritative cluster state machine.
//!
//! [`Scheduler`] owns the job registry, worker pool, queue, resource ledger
//! and progress tracker, and is the only thing that mutates them. It is a
//! plain synchronous struct; [`crate::scheduler::service`] wraps it in an
//! actor so that every command is applied one at a time.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::events::{EventBus, EventEnvelope, SchedulerEvent};
use crate::scheduler::job::{
    Job, JobId, JobSpec, JobStatus, Outcome, PayloadRef, Resources, WorkerId,
};
use crate::scheduler::monitor::{detect_timeouts, SweepReport};
use crate::scheduler::pool::{Registration, WorkerPool, WorkerSnapshot};
use crate::scheduler::progress::{GroupProgress, ProgressTracker, ProgressUpdate};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::resources::ResourceManager;

/// A job placed on a worker during a tick, ready to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub payload: PayloadRef,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and is now Cancelled.
    Cancelled,
    /// The job is running; the worker must be told to stop.
    Signal { worker_id: WorkerId },
    /// A cancel is already in flight.
    AlreadyCancelling,
    /// Nothing to do.
    AlreadyTerminal(JobStatus),
}

/// Cluster counters for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_workers: usize,
    pub active_workers: usize,
    pub queue_depth: usize,
    pub running: usize,
    pub cancelling: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub allocated: Resources,
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    jobs: HashMap<JobId, Job>,
    queue: JobQueue,
    pool: WorkerPool,
    resources: ResourceManager,
    progress: ProgressTracker,
    cancel_deadlines: HashMap<JobId, Instant>,
    finished_at: HashMap<JobId, Instant>,
    events: EventBus,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            resources: ResourceManager::new(config.cluster_cap),
            events: EventBus::new(config.event_buffer),
            config,
            jobs: HashMap::new(),
            queue: JobQueue::new(),
            pool: WorkerPool::new(),
            progress: ProgressTracker::new(),
            cancel_deadlines: HashMap::new(),
            finished_at: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> EventBus {
        self.events.clone()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Admit a job. Rejected outright if no worker ever seen could hold it.
    pub fn submit(&mut self, spec: JobSpec) -> Result<JobId> {
        if !self.resources.could_ever_fit(&spec.requirements) {
            return Err(SchedulerError::Submission(format!(
                "requirements {} exceed every known worker capacity",
                spec.requirements
            )));
        }

        let live = self.jobs.len() - self.finished_at.len();
        if live >= self.config.max_jobs {
            return Err(SchedulerError::CapacityExceeded(format!(
                "job registry full ({} live jobs)",
                live
            )));
        }

        let job = Job::new(spec, self.config.default_max_retries);
        let job_id = job.id;

        self.progress.track(job_id, job.group.as_deref());
        self.queue.enqueue(&job);
        self.events.publish(SchedulerEvent::JobSubmitted {
            job_id,
            priority: job.priority,
            requirements: job.requirements,
            group: job.group.clone(),
        });
        tracing::info!(
            job_id = %job_id,
            priority = job.priority,
            requirements = %job.requirements,
            max_retries = job.max_retries,
            "Job submitted"
        );
        self.jobs.insert(job_id, job);

        Ok(job_id)
    }

    pub fn cancel(&mut self, job_id: &JobId) -> Result<CancelOutcome> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or(SchedulerError::JobNotFound(*job_id))?;

        match job.status {
            JobStatus::Pending => {
                // Not queued means it was already dequeued; nothing to remove.
                if let Err(e) = self.queue.remove(job_id) {
                    tracing::debug!(job_id = %job_id, error = %e, "Pending job was not queued");
                }
                self.finalize(job_id, JobStatus::Cancelled, None);
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Running => {
                let worker_id = job
                    .assigned_worker
                    .ok_or_else(|| SchedulerError::JobNotFound(*job_id))?;
                job.status = JobStatus::Cancelling;
                self.cancel_deadlines
                    .insert(*job_id, Instant::now() + self.config.cancel_grace());
                tracing::info!(job_id = %job_id, worker_id, "Cancelling running job");
                Ok(CancelOutcome::Signal { worker_id })
            }
            JobStatus::Cancelling => Ok(CancelOutcome::AlreadyCancelling),
            status => Ok(CancelOutcome::AlreadyTerminal(status)),
        }
    }

    /// Register or re-register a worker. Jobs a live worker still had on
    /// record are treated as lost attempts.
    pub fn register_worker(&mut self, worker_id: WorkerId, capacity: Resources) -> Registration {
        let registration = self.pool.register(worker_id, capacity);
        self.resources.set_capacity(worker_id, capacity);

        for job_id in &registration.stale_jobs {
            self.abandon_attempt(
                job_id,
                format!("worker {worker_id} re-registered while running the job"),
            );
        }

        self.events.publish(SchedulerEvent::WorkerRegistered {
            worker_id,
            capacity,
        });
        registration
    }

    /// Record a heartbeat and apply the progress it carries. Reports for
    /// jobs the worker is not running are dropped.
    pub fn heartbeat(&mut self, worker_id: WorkerId, updates: &[ProgressUpdate]) -> Result<()> {
        self.pool.heartbeat(worker_id)?;

        for update in updates {
            let Some(job) = self.jobs.get_mut(&update.job_id) else {
                continue;
            };
            if job.status != JobStatus::Running || job.assigned_worker != Some(worker_id) {
                continue;
            }
            if let Some(percent) = self.progress.update(&update.job_id, update.percent) {
                job.progress = percent;
                tracing::trace!(job_id = %update.job_id, worker_id, percent, "Progress");
            }
        }
        Ok(())
    }

    /// Apply a worker's outcome report for one attempt. Duplicate reports,
    /// and reports for an attempt that is no longer current, are no-ops.
    pub fn report_result(
        &mut self,
        job_id: &JobId,
        worker_id: WorkerId,
        attempt: u32,
        outcome: Outcome,
    ) -> Result<()> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or(SchedulerError::JobNotFound(*job_id))?;

        if job.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "Report for finished job ignored");
            return Ok(());
        }
        if job.assigned_worker != Some(worker_id) || job.attempts != attempt {
            tracing::debug!(
                job_id = %job_id,
                worker_id,
                attempt,
                assigned = ?job.assigned_worker,
                current_attempt = job.attempts,
                "Report from stale attempt ignored"
            );
            return Ok(());
        }

        let status = job.status;
        self.release_assignment(job_id);

        if status == JobStatus::Cancelling {
            self.finalize(job_id, JobStatus::Cancelled, Some(worker_id));
            return Ok(());
        }

        match outcome {
            Outcome::Succeeded { detail } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.result = detail;
                }
                self.finalize(job_id, JobStatus::Completed, Some(worker_id));
            }
            Outcome::Failed { error } => {
                tracing::warn!(job_id = %job_id, worker_id, error = %error, "Job attempt failed");
                self.retry_or_fail(job_id, error);
            }
            Outcome::Cancelled => {
                self.finalize(job_id, JobStatus::Cancelled, Some(worker_id));
            }
        }
        Ok(())
    }

    /// Place as many queued jobs as fit right now.
    ///
    /// Jobs come off the queue in priority order; each goes to the fitting
    /// worker left with the least spare capacity, lowest id on ties.
    pub fn tick(&mut self) -> Vec<Assignment> {
        let mut assignments = Vec::new();

        loop {
            let headroom = self.resources.cluster_headroom();
            let candidates: Vec<(WorkerId, Resources)> = self
                .pool
                .online()
                .filter_map(|w| {
                    let spare = self.resources.spare(w.id)?;
                    Some((w.id, headroom.map_or(spare, |h| spare.component_min(&h))))
                })
                .collect();
            if candidates.is_empty() {
                break;
            }

            let spares: Vec<Resources> = candidates.iter().map(|(_, spare)| *spare).collect();
            let Some(entry) = self.queue.dequeue_eligible(&spares) else {
                break;
            };

            let best = candidates
                .iter()
                .filter(|(_, spare)| entry.requirements.fits_within(spare))
                .min_by_key(|(id, spare)| {
                    let left = spare.saturating_sub(&entry.requirements);
                    (left.cpu, left.memory, *id)
                })
                .map(|(id, _)| *id);
            let Some(worker_id) = best else {
                self.queue.restore(entry);
                break;
            };

            match self.resources.try_reserve(worker_id, entry.requirements) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(job_id = %entry.id, worker_id, "Reservation refused");
                    self.queue.restore(entry);
                    break;
                }
                Err(e) => {
                    tracing::debug!(job_id = %entry.id, worker_id, error = %e, "Reservation deferred");
                    self.queue.restore(entry);
                    break;
                }
            }

            if let Err(e) = self.pool.assign(worker_id, entry.id) {
                tracing::warn!(job_id = %entry.id, worker_id, error = %e, "Assignment rejected by pool");
                self.resources.release(worker_id, entry.requirements);
                self.queue.restore(entry);
                break;
            }

            let Some(job) = self.jobs.get_mut(&entry.id) else {
                self.pool.release(worker_id, &entry.id);
                self.resources.release(worker_id, entry.requirements);
                continue;
            };
            job.status = JobStatus::Running;
            job.assigned_worker = Some(worker_id);
            job.started_at = Some(Utc::now());
            job.attempts += 1;
            job.progress = 0;
            self.progress.start(&entry.id);

            self.events.publish(SchedulerEvent::JobAssigned {
                job_id: entry.id,
                worker_id,
                attempt: job.attempts,
            });
            tracing::info!(job_id = %entry.id, worker_id, attempt = job.attempts, "Job assigned");

            assignments.push(Assignment {
                job_id: entry.id,
                worker_id,
                payload: job.payload.clone(),
                attempt: job.attempts,
            });
        }

        assignments
    }

    /// Fault-monitor pass: take silent workers offline and recover their
    /// jobs, finalize cancellations past their grace period, and prune old
    /// finished jobs.
    pub fn sweep(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for signal in detect_timeouts(&self.pool, now, self.config.worker_timeout()) {
            tracing::warn!(
                worker_id = signal.worker_id,
                error = %SchedulerError::from(signal),
                "Worker heartbeat timed out"
            );
            self.recover_worker(signal.worker_id, signal.silent_for_ms, &mut report);
        }

        let expired: Vec<JobId> = self
            .cancel_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for job_id in expired {
            tracing::info!(job_id = %job_id, "Cancel grace period elapsed");
            let worker = self.jobs.get(&job_id).and_then(|j| j.assigned_worker);
            self.release_assignment(&job_id);
            self.finalize(&job_id, JobStatus::Cancelled, worker);
            report.cancelled.push(job_id);
        }

        if let Some(retention) = self.config.finished_job_retention() {
            let stale: Vec<JobId> = self
                .finished_at
                .iter()
                .filter(|(_, at)| now.saturating_duration_since(**at) > retention)
                .map(|(id, _)| *id)
                .collect();
            for job_id in stale {
                self.finished_at.remove(&job_id);
                self.jobs.remove(&job_id);
                self.progress.forget(&job_id);
                report.pruned += 1;
            }
        }

        report
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn status(&self, job_id: &JobId) -> Result<JobStatus> {
        self.job(job_id).map(|j| j.status)
    }

    pub fn job(&self, job_id: &JobId) -> Result<&Job> {
        self.jobs
            .get(job_id)
            .ok_or(SchedulerError::JobNotFound(*job_id))
    }

    /// All known jobs, oldest submission first.
    pub fn list_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs
    }

    pub fn group_progress(&self, group: &str) -> Option<GroupProgress> {
        self.progress.group(group)
    }

    pub fn cluster_summary(&self) -> ClusterSummary {
        let mut summary = ClusterSummary {
            total_workers: self.pool.len(),
            active_workers: self.pool.online().count(),
            queue_depth: self.queue.len(),
            allocated: self.resources.cluster_allocated(),
            ..Default::default()
        };
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Pending => {}
                JobStatus::Running => summary.running += 1,
                JobStatus::Cancelling => summary.cancelling += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.pool
            .workers()
            .map(|w| {
                let allocated = self.resources.allocated(w.id).unwrap_or_default();
                WorkerSnapshot::new(w, allocated)
            })
            .collect()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    // ------------------------------------------------------------------
    // Internal transitions
    // ------------------------------------------------------------------

    /// Detach a job from its worker and give the capacity back.
    fn release_assignment(&mut self, job_id: &JobId) {
        self.cancel_deadlines.remove(job_id);
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        if let Some(worker_id) = job.assigned_worker.take() {
            self.pool.release(worker_id, job_id);
            self.resources.release(worker_id, job.requirements);
        }
    }

    fn recover_worker(&mut self, worker_id: WorkerId, silent_for_ms: u64, report: &mut SweepReport) {
        let orphaned = match self.pool.mark_offline(worker_id) {
            Ok(orphaned) => orphaned,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "Could not mark worker offline");
                return;
            }
        };
        self.resources.clear_allocations(worker_id);
        report.offline_workers.push(worker_id);
        self.events.publish(SchedulerEvent::WorkerOffline {
            worker_id,
            orphaned: orphaned.len(),
        });

        for job_id in orphaned {
            let error = format!("worker {worker_id} lost after {silent_for_ms}ms without heartbeat");
            match self.abandon_attempt(&job_id, error) {
                Some(JobStatus::Pending) => report.requeued.push(job_id),
                Some(JobStatus::Failed) => report.failed.push(job_id),
                Some(JobStatus::Cancelled) => report.cancelled.push(job_id),
                _ => {}
            }
        }
    }

    /// The worker holding this job is gone and its capacity is already
    /// reclaimed. Charge a retry and requeue or fail the job.
    fn abandon_attempt(&mut self, job_id: &JobId, error: String) -> Option<JobStatus> {
        let job = self.jobs.get_mut(job_id)?;
        match job.status {
            JobStatus::Running => {
                job.assigned_worker = None;
                self.retry_or_fail(job_id, error)
            }
            JobStatus::Cancelling => {
                job.assigned_worker = None;
                self.cancel_deadlines.remove(job_id);
                self.finalize(job_id, JobStatus::Cancelled, None);
                Some(JobStatus::Cancelled)
            }
            _ => None,
        }
    }

    /// Bump `retries` and either requeue at the head of the band or, once
    /// the retry budget is spent, fail the job for good.
    fn retry_or_fail(&mut self, job_id: &JobId, error: String) -> Option<JobStatus> {
        let job = self.jobs.get_mut(job_id)?;
        job.retries += 1;
        job.error = Some(error.clone());
        job.assigned_worker = None;

        if job.retries > job.max_retries {
            let failure = SchedulerError::PermanentFailure {
                job_id: *job_id,
                error,
            };
            tracing::error!(job_id = %job_id, retries = job.retries, "{failure}");
            self.finalize(job_id, JobStatus::Failed, None);
            return Some(JobStatus::Failed);
        }

        job.status = JobStatus::Pending;
        job.progress = 0;
        let retries = job.retries;
        self.progress.suspend(job_id);
        self.queue.requeue(job);
        self.events.publish(SchedulerEvent::JobRequeued {
            job_id: *job_id,
            retries,
            reason: error,
        });
        tracing::info!(job_id = %job_id, retries, "Job requeued");
        Some(JobStatus::Pending)
    }

    /// Move a job into a terminal state. Terminal states never change.
    fn finalize(&mut self, job_id: &JobId, status: JobStatus, executed_by: Option<WorkerId>) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        if job.is_terminal() {
            return;
        }
        job.status = status;
        job.completed_at = Some(Utc::now());
        job.assigned_worker = None;
        if executed_by.is_some() {
            job.executed_by = executed_by;
        }

        self.progress.finish(job_id, status);
        if let Some(progress) = self.progress.progress(job_id) {
            job.progress = progress;
        }
        self.finished_at.insert(*job_id, Instant::now());

        let event = match status {
            JobStatus::Completed => SchedulerEvent::JobCompleted {
                job_id: *job_id,
                worker_id: executed_by.unwrap_or_default(),
                detail: job.result.clone(),
            },
            JobStatus::Failed => SchedulerEvent::JobFailed {
                job_id: *job_id,
                retries: job.retries,
                error: job.error.clone().unwrap_or_default(),
            },
            _ => SchedulerEvent::JobCancelled { job_id: *job_id },
        };
        tracing::info!(job_id = %job_id, status = %status, executed_by = ?executed_by, "Job finished");
        self.events.publish(event);
    }
}
