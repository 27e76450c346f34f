use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{JobId, Outcome, Resources, WorkerId};
use crate::scheduler::progress::ProgressUpdate;
use crate::scheduler::service::{SchedulerHandle, WorkerInbox, WorkerInstruction};
use crate::worker::executor::{JobRunner, ProgressReporter};
use crate::worker::heartbeat::HeartbeatSchedule;

/// Worker-side loop: registers with the scheduler, executes assignments
/// concurrently through a [`JobRunner`], carries progress on heartbeats and
/// reports outcomes. It only talks to the scheduler through its handle.
pub struct WorkerAgent<R: JobRunner> {
    id: WorkerId,
    capacity: Resources,
    handle: SchedulerHandle,
    runner: Arc<R>,
    config: WorkerConfig,
}

impl<R: JobRunner> WorkerAgent<R> {
    pub fn new(
        id: WorkerId,
        capacity: Resources,
        handle: SchedulerHandle,
        runner: R,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id,
            capacity,
            handle,
            runner: Arc::new(runner),
            config,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Run until `shutdown` fires or the scheduler goes away. Jobs still
    /// executing on exit are aborted.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut inbox = self.register().await?;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(JobId, u32, Outcome)>();
        // Keyed by job, tagged with the attempt the task is running.
        let mut running: HashMap<JobId, (u32, AbortHandle)> = HashMap::new();
        let mut pending_progress: HashMap<JobId, u8> = HashMap::new();

        let schedule = HeartbeatSchedule::from_config(&self.config);
        let heartbeat = tokio::time::sleep(schedule.next_delay());
        tokio::pin!(heartbeat);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id = self.id, "Worker stopping");
                    break;
                }

                instruction = inbox.recv() => {
                    match instruction {
                        Some(WorkerInstruction::Execute { job_id, payload, attempt }) => {
                            match running.get(&job_id) {
                                Some((current, _)) if *current >= attempt => continue,
                                Some((_, task)) => task.abort(),
                                None => {}
                            }
                            tracing::debug!(worker_id = self.id, job_id = %job_id, attempt, "Starting job");
                            let runner = self.runner.clone();
                            let reporter = ProgressReporter::new(job_id, progress_tx.clone());
                            let done_tx = done_tx.clone();
                            let task = tokio::spawn(async move {
                                let outcome = runner.run(job_id, &payload, reporter).await;
                                let _ = done_tx.send((job_id, attempt, outcome));
                            });
                            running.insert(job_id, (attempt, task.abort_handle()));
                        }
                        Some(WorkerInstruction::Cancel { job_id, attempt }) => {
                            if let Some((_, task)) = running.remove(&job_id) {
                                task.abort();
                            }
                            pending_progress.remove(&job_id);
                            if let Err(e) = self.handle.report_result(job_id, self.id, attempt, Outcome::Cancelled).await {
                                tracing::warn!(worker_id = self.id, job_id = %job_id, error = %e, "Cancel acknowledgement failed");
                            }
                        }
                        None => {
                            tracing::info!(worker_id = self.id, "Scheduler closed worker link");
                            break;
                        }
                    }
                }

                Some(update) = progress_rx.recv() => {
                    if running.contains_key(&update.job_id) {
                        let latest = pending_progress.entry(update.job_id).or_insert(0);
                        *latest = (*latest).max(update.percent);
                    }
                }

                Some((job_id, attempt, outcome)) = done_rx.recv() => {
                    // Aborted tasks can leave an outcome already queued
                    if !matches!(running.get(&job_id), Some((current, _)) if *current == attempt) {
                        tracing::debug!(worker_id = self.id, job_id = %job_id, attempt, "Dropping outcome of superseded attempt");
                        continue;
                    }
                    running.remove(&job_id);
                    pending_progress.remove(&job_id);
                    if let Err(e) = self.handle.report_result(job_id, self.id, attempt, outcome).await {
                        tracing::warn!(worker_id = self.id, job_id = %job_id, error = %e, "Result report failed");
                        if e == SchedulerError::ChannelClosed {
                            break;
                        }
                    }
                }

                () = &mut heartbeat => {
                    let updates: Vec<ProgressUpdate> = pending_progress
                        .drain()
                        .map(|(job_id, percent)| ProgressUpdate { job_id, percent })
                        .collect();
                    match self.handle.heartbeat(self.id, updates).await {
                        Ok(()) => {}
                        Err(SchedulerError::WorkerOffline(_)) | Err(SchedulerError::WorkerNotFound(_)) => {
                            tracing::warn!(worker_id = self.id, abandoned = running.len(), "Declared offline, re-registering");
                            for (_, (_, task)) in running.drain() {
                                task.abort();
                            }
                            inbox = self.register().await?;
                        }
                        Err(SchedulerError::ChannelClosed) => break,
                        Err(e) => {
                            tracing::warn!(worker_id = self.id, error = %e, "Heartbeat failed");
                        }
                    }
                    heartbeat.as_mut().reset(Instant::now() + schedule.next_delay());
                }
            }
        }

        for (_, (_, task)) in running.drain() {
            task.abort();
        }
        Ok(())
    }

    async fn register(&self) -> Result<WorkerInbox> {
        let inbox = self.handle.register_worker(self.id, self.capacity).await?;
        tracing::info!(worker_id = self.id, capacity = %self.capacity, "Registered with scheduler");
        Ok(inbox)
    }
}
