use std::collections::HashMap;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::core::{Assignment, CancelOutcome, ClusterSummary, Scheduler};
use crate::scheduler::events::{EventBus, EventEnvelope};
use crate::scheduler::job::{Job, JobId, JobSpec, JobStatus, Outcome, PayloadRef, Resources, WorkerId};
use crate::scheduler::monitor::{FaultMonitor, SweepReport};
use crate::scheduler::pool::WorkerSnapshot;
use crate::scheduler::progress::{GroupProgress, ProgressUpdate};

/// Instructions the scheduler sends down to a registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerInstruction {
    Execute {
        job_id: JobId,
        payload: PayloadRef,
        attempt: u32,
    },
    Cancel {
        job_id: JobId,
        attempt: u32,
    },
}

/// Receiving end handed to a worker on registration.
pub type WorkerInbox = mpsc::UnboundedReceiver<WorkerInstruction>;

/// Commands for the scheduler event loop
#[derive(Debug)]
pub enum SchedulerMessage {
    Submit {
        spec: JobSpec,
        response_tx: oneshot::Sender<Result<JobId>>,
    },
    GetJob {
        job_id: JobId,
        response_tx: oneshot::Sender<Result<Job>>,
    },
    ListJobs {
        response_tx: oneshot::Sender<Vec<Job>>,
    },
    Cancel {
        job_id: JobId,
        response_tx: oneshot::Sender<Result<CancelOutcome>>,
    },
    RegisterWorker {
        worker_id: WorkerId,
        capacity: Resources,
        response_tx: oneshot::Sender<WorkerInbox>,
    },
    Heartbeat {
        worker_id: WorkerId,
        updates: Vec<ProgressUpdate>,
        response_tx: oneshot::Sender<Result<()>>,
    },
    ReportResult {
        job_id: JobId,
        worker_id: WorkerId,
        attempt: u32,
        outcome: Outcome,
        response_tx: oneshot::Sender<Result<()>>,
    },
    ClusterSummary {
        response_tx: oneshot::Sender<ClusterSummary>,
    },
    GroupProgress {
        group: String,
        response_tx: oneshot::Sender<Option<GroupProgress>>,
    },
    Workers {
        response_tx: oneshot::Sender<Vec<WorkerSnapshot>>,
    },
    /// Sent by the fault monitor on its own interval.
    Sweep {
        response_tx: oneshot::Sender<SweepReport>,
    },
}

/// Single-writer actor around [`Scheduler`]. Commands are applied strictly
/// one at a time; after any command that can free capacity or add work,
/// a scheduling tick runs and its assignments are dispatched.
pub struct SchedulerService {
    scheduler: Scheduler,
    links: HashMap<WorkerId, mpsc::UnboundedSender<WorkerInstruction>>,
    message_rx: mpsc::Receiver<SchedulerMessage>,
}

impl SchedulerService {
    pub fn new(config: SchedulerConfig) -> (Self, SchedulerHandle) {
        let (message_tx, message_rx) = mpsc::channel(config.command_buffer.max(1));
        let scheduler = Scheduler::new(config);
        let handle = SchedulerHandle {
            message_tx,
            events: scheduler.event_bus(),
        };
        let service = Self {
            scheduler,
            links: HashMap::new(),
            message_rx,
        };
        (service, handle)
    }

    /// Start the scheduler actor and its fault monitor. Both stop when
    /// `shutdown` is cancelled.
    pub fn spawn(config: SchedulerConfig, shutdown: CancellationToken) -> (SchedulerHandle, JoinHandle<()>) {
        let interval = config.liveness_check_interval();
        let (service, handle) = Self::new(config);

        let actor = tokio::spawn(service.run(shutdown.clone()));

        let monitor = FaultMonitor::new(handle.clone(), interval);
        tokio::spawn(monitor.run(shutdown));

        (handle, actor)
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            worker_timeout_ms = self.scheduler.config().worker_timeout_ms,
            max_jobs = self.scheduler.config().max_jobs,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                msg = self.message_rx.recv() => {
                    let Some(msg) = msg else {
                        tracing::debug!("All scheduler handles dropped");
                        break;
                    };
                    if self.handle_message(msg) {
                        let assignments = self.scheduler.tick();
                        self.dispatch(assignments);
                    }
                }
            }
        }
    }

    /// Apply one command. Returns whether a scheduling tick should follow.
    fn handle_message(&mut self, msg: SchedulerMessage) -> bool {
        match msg {
            SchedulerMessage::Submit { spec, response_tx } => {
                let result = self.scheduler.submit(spec);
                let accepted = result.is_ok();
                let _ = response_tx.send(result);
                accepted
            }
            SchedulerMessage::GetJob {
                job_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.scheduler.job(&job_id).cloned());
                false
            }
            SchedulerMessage::ListJobs { response_tx } => {
                let jobs = self.scheduler.list_jobs().into_iter().cloned().collect();
                let _ = response_tx.send(jobs);
                false
            }
            SchedulerMessage::Cancel {
                job_id,
                response_tx,
            } => {
                let result = self.scheduler.cancel(&job_id);
                if let Ok(CancelOutcome::Signal { worker_id }) = result {
                    let attempt = self.scheduler.job(&job_id).map_or(0, |job| job.attempts);
                    self.send_instruction(worker_id, WorkerInstruction::Cancel { job_id, attempt });
                }
                let _ = response_tx.send(result);
                false
            }
            SchedulerMessage::RegisterWorker {
                worker_id,
                capacity,
                response_tx,
            } => {
                self.scheduler.register_worker(worker_id, capacity);
                let (tx, rx) = mpsc::unbounded_channel();
                self.links.insert(worker_id, tx);
                let _ = response_tx.send(rx);
                true
            }
            SchedulerMessage::Heartbeat {
                worker_id,
                updates,
                response_tx,
            } => {
                let result = self.scheduler.heartbeat(worker_id, &updates);
                let ok = result.is_ok();
                let _ = response_tx.send(result);
                ok
            }
            SchedulerMessage::ReportResult {
                job_id,
                worker_id,
                attempt,
                outcome,
                response_tx,
            } => {
                let result = self.scheduler.report_result(&job_id, worker_id, attempt, outcome);
                let ok = result.is_ok();
                let _ = response_tx.send(result);
                ok
            }
            SchedulerMessage::ClusterSummary { response_tx } => {
                let _ = response_tx.send(self.scheduler.cluster_summary());
                false
            }
            SchedulerMessage::GroupProgress { group, response_tx } => {
                let _ = response_tx.send(self.scheduler.group_progress(&group));
                false
            }
            SchedulerMessage::Workers { response_tx } => {
                let _ = response_tx.send(self.scheduler.workers());
                false
            }
            SchedulerMessage::Sweep { response_tx } => {
                let report = self.scheduler.sweep(Instant::now());
                let changed = !report.is_empty();
                let _ = response_tx.send(report);
                changed
            }
        }
    }

    fn dispatch(&mut self, assignments: Vec<Assignment>) {
        for assignment in assignments {
            self.send_instruction(
                assignment.worker_id,
                WorkerInstruction::Execute {
                    job_id: assignment.job_id,
                    payload: assignment.payload,
                    attempt: assignment.attempt,
                },
            );
        }
    }

    /// Best effort: a worker that cannot be reached stops heartbeating and
    /// the fault monitor recovers its jobs.
    fn send_instruction(&mut self, worker_id: WorkerId, instruction: WorkerInstruction) {
        let delivered = self
            .links
            .get(&worker_id)
            .is_some_and(|link| link.send(instruction).is_ok());
        if !delivered {
            tracing::warn!(worker_id, "Worker link unavailable, instruction dropped");
            self.links.remove(&worker_id);
        }
    }
}

/// Cloneable client for the scheduler actor. Every call is a message
/// round-trip; none of them wait on job execution.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    message_tx: mpsc::Sender<SchedulerMessage>,
    events: EventBus,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SchedulerMessage,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.message_tx
            .send(make(response_tx))
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        response_rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        self.request(|response_tx| SchedulerMessage::Submit { spec, response_tx })
            .await?
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatus> {
        Ok(self.job(job_id).await?.status)
    }

    pub async fn job(&self, job_id: JobId) -> Result<Job> {
        self.request(|response_tx| SchedulerMessage::GetJob {
            job_id,
            response_tx,
        })
        .await?
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.request(|response_tx| SchedulerMessage::ListJobs { response_tx })
            .await
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome> {
        self.request(|response_tx| SchedulerMessage::Cancel {
            job_id,
            response_tx,
        })
        .await?
    }

    pub async fn register_worker(&self, worker_id: WorkerId, capacity: Resources) -> Result<WorkerInbox> {
        self.request(|response_tx| SchedulerMessage::RegisterWorker {
            worker_id,
            capacity,
            response_tx,
        })
        .await
    }

    pub async fn heartbeat(&self, worker_id: WorkerId, updates: Vec<ProgressUpdate>) -> Result<()> {
        self.request(|response_tx| SchedulerMessage::Heartbeat {
            worker_id,
            updates,
            response_tx,
        })
        .await?
    }

    pub async fn report_result(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        attempt: u32,
        outcome: Outcome,
    ) -> Result<()> {
        self.request(|response_tx| SchedulerMessage::ReportResult {
            job_id,
            worker_id,
            attempt,
            outcome,
            response_tx,
        })
        .await?
    }

    pub async fn cluster_summary(&self) -> Result<ClusterSummary> {
        self.request(|response_tx| SchedulerMessage::ClusterSummary { response_tx })
            .await
    }

    pub async fn group_progress(&self, group: impl Into<String>) -> Result<Option<GroupProgress>> {
        let group = group.into();
        self.request(|response_tx| SchedulerMessage::GroupProgress { group, response_tx })
            .await
    }

    pub async fn workers(&self) -> Result<Vec<WorkerSnapshot>> {
        self.request(|response_tx| SchedulerMessage::Workers { response_tx })
            .await
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.request(|response_tx| SchedulerMessage::Sweep { response_tx })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Resolve once the job reaches a terminal state. A job that exhausted
    /// its retries comes back as `PermanentFailure`.
    pub async fn wait_for_terminal(&self, job_id: JobId) -> Result<Job> {
        let mut events = self.subscribe();
        loop {
            let job = self.job(job_id).await?;
            if job.is_terminal() {
                if job.status == JobStatus::Failed {
                    return Err(SchedulerError::PermanentFailure {
                        job_id,
                        error: job.error.unwrap_or_default(),
                    });
                }
                return Ok(job);
            }

            loop {
                match events.recv().await {
                    Ok(envelope) if envelope.event.job_id() == Some(job_id) && envelope.event.is_terminal() => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return Err(SchedulerError::ChannelClosed),
                }
            }
        }
    }
}
