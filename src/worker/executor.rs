use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::scheduler::job::{JobId, Outcome, PayloadRef};
use crate::scheduler::progress::ProgressUpdate;

/// Handed to a runner so it can stream progress for the job it executes.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self { job_id, tx }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn report(&self, percent: u8) {
        // The worker may already have moved on; nothing to do then.
        let _ = self.tx.send(ProgressUpdate {
            job_id: self.job_id,
            percent: percent.min(100),
        });
    }
}

/// Execution backend a worker drives. The scheduler never interprets the
/// payload; runners do.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job_id: JobId, payload: &PayloadRef, progress: ProgressReporter) -> Outcome;
}

/// Runs the payload descriptor as a shell command line.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: String,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn process_output(job_id: JobId, result: std::io::Result<std::process::Output>) -> Outcome {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                tracing::info!(job_id = %job_id, exit_code = ?exit_code, "Command finished");

                if output.status.success() {
                    Outcome::Succeeded {
                        detail: if stdout.is_empty() { None } else { Some(stdout) },
                    }
                } else {
                    Outcome::Failed {
                        error: if stderr.is_empty() {
                            format!("Exit code: {:?}", exit_code)
                        } else {
                            stderr
                        },
                    }
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Command could not be started");
                Outcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl JobRunner for CommandRunner {
    async fn run(&self, job_id: JobId, payload: &PayloadRef, progress: ProgressReporter) -> Outcome {
        tracing::info!(job_id = %job_id, command = %payload, "Executing job");
        progress.report(0);

        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(payload.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let outcome = Self::process_output(job_id, result);
        if matches!(outcome, Outcome::Succeeded { .. }) {
            progress.report(100);
        }
        outcome
    }
}

/// Stand-in workload: advances through a fixed number of steps, reporting
/// progress after each, then fails with the configured probability.
#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    step: Duration,
    steps: u8,
    failure_rate: f64,
}

impl SimulatedRunner {
    pub fn new(step: Duration, steps: u8) -> Self {
        Self {
            step,
            steps: steps.max(1),
            failure_rate: 0.0,
        }
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        self
    }
}

#[async_trait]
impl JobRunner for SimulatedRunner {
    async fn run(&self, job_id: JobId, payload: &PayloadRef, progress: ProgressReporter) -> Outcome {
        for step in 1..=self.steps {
            tokio::time::sleep(self.step).await;
            progress.report((u32::from(step) * 100 / u32::from(self.steps)) as u8);
        }

        let failed = rand::thread_rng().gen_bool(self.failure_rate);
        if failed {
            tracing::debug!(job_id = %job_id, "Simulated failure");
            Outcome::Failed {
                error: format!("simulated failure running {payload}"),
            }
        } else {
            Outcome::Succeeded {
                detail: Some(format!("{payload} done")),
            }
        }
    }
}
