use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jobforge::config::{SchedulerConfig, WorkerConfig};
use jobforge::scheduler::{
    ClusterSummary, GroupProgress, Job, JobId, JobSpec, JobStatus, Resources, SchedulerHandle,
    SchedulerService,
};
use jobforge::shutdown::install_shutdown_handler;
use jobforge::worker::{CommandRunner, JobRunner, SimulatedRunner, WorkerAgent};
use jobforge::SchedulerError;

const SIMULATION_GROUP: &str = "simulation";

#[derive(Parser, Debug)]
#[command(name = "jobforge")]
#[command(version)]
#[command(about = "Priority-ordered, resource-aware job scheduler")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an in-process cluster of simulated workers against a batch of jobs
    Simulate(SimulateArgs),

    /// Execute shell commands as jobs on a single local worker
    Run(RunArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of workers
    #[arg(long, default_value = "3")]
    workers: u64,

    /// CPU units per worker
    #[arg(long, default_value = "4")]
    cpu: u32,

    /// Memory units per worker
    #[arg(long, default_value = "4096")]
    memory: u64,

    /// Number of jobs to submit
    #[arg(long, default_value = "20")]
    jobs: usize,

    /// Probability that a simulated attempt fails
    #[arg(long, default_value = "0.1")]
    failure_rate: f64,

    /// Retry budget per job
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Duration of one simulated work step
    #[arg(long, default_value = "100")]
    step_ms: u64,

    /// Work steps per job (one progress report each)
    #[arg(long, default_value = "5")]
    steps: u8,

    #[arg(long, default_value = "200")]
    heartbeat_ms: u64,

    #[arg(long, default_value = "1000")]
    worker_timeout_ms: u64,

    /// Stop this worker mid-run to exercise failure recovery
    #[arg(long)]
    kill_worker: Option<u64>,

    #[arg(long, default_value = "300")]
    kill_after_ms: u64,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Commands to execute (each one becomes a job)
    #[arg(required = true)]
    commands: Vec<String>,

    /// Retry budget per job
    #[arg(long, default_value = "0")]
    max_retries: u32,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Parser, Debug)]
struct OutputArgs {
    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobOutput {
    job_id: JobId,
    status: String,
    priority: i32,
    attempts: u32,
    retries: u32,
    executed_by: Option<u64>,
    progress: u8,
    result: Option<String>,
    error: Option<String>,
}

impl From<&Job> for JobOutput {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status.to_string(),
            priority: job.priority,
            attempts: job.attempts,
            retries: job.retries,
            executed_by: job.executed_by,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

#[derive(Serialize)]
struct RunOutput {
    jobs: Vec<JobOutput>,
    summary: ClusterSummary,
    group: Option<GroupProgress>,
}

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Start an agent under its own child token so it can be stopped alone.
fn spawn_agent<R: JobRunner>(
    id: u64,
    capacity: Resources,
    handle: &SchedulerHandle,
    runner: R,
    config: WorkerConfig,
    shutdown: &CancellationToken,
) -> CancellationToken {
    let token = shutdown.child_token();
    let agent = WorkerAgent::new(id, capacity, handle.clone(), runner, config);
    let agent_token = token.clone();
    tokio::spawn(async move {
        if let Err(e) = agent.run(agent_token).await {
            tracing::error!(worker_id = id, error = %e, "Worker agent exited");
        }
    });
    token
}

/// Wait for every job to finish and return them in submission order.
async fn collect_results(
    handle: &SchedulerHandle,
    job_ids: &[JobId],
) -> Result<Vec<Job>, SchedulerError> {
    let mut jobs = Vec::with_capacity(job_ids.len());
    for job_id in job_ids {
        match handle.wait_for_terminal(*job_id).await {
            Ok(job) => jobs.push(job),
            Err(SchedulerError::PermanentFailure { .. }) => jobs.push(handle.job(*job_id).await?),
            Err(e) => return Err(e),
        }
    }
    Ok(jobs)
}

fn print_output(
    output: &RunOutput,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(output)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<38} {:<10} {:<5} {:<8} {:<7} RESULT",
                "JOB ID", "STATUS", "PRIO", "ATTEMPTS", "WORKER"
            );
            println!("{}", "-".repeat(90));
            for job in &output.jobs {
                let worker = job
                    .executed_by
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let detail = job
                    .result
                    .as_deref()
                    .or(job.error.as_deref())
                    .unwrap_or("")
                    .lines()
                    .next()
                    .unwrap_or("");
                println!(
                    "{:<38} {:<10} {:<5} {:<8} {:<7} {}",
                    job.job_id, job.status, job.priority, job.attempts, worker, detail
                );
            }

            let summary = &output.summary;
            println!();
            println!("Cluster Summary");
            println!("{}", "=".repeat(40));
            println!(
                "Workers:   {} online / {} known",
                summary.active_workers, summary.total_workers
            );
            println!("Completed: {}", summary.completed);
            println!("Failed:    {}", summary.failed);
            println!("Cancelled: {}", summary.cancelled);
            if let Some(group) = &output.group {
                println!(
                    "Group '{}': {}/{} completed ({}%)",
                    group.group, group.completed, group.total, group.percent
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_simulation(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = install_shutdown_handler();

    let config = SchedulerConfig::default()
        .with_worker_timeout_ms(args.worker_timeout_ms)
        .with_liveness_check_interval_ms((args.worker_timeout_ms / 4).max(10))
        .with_default_max_retries(args.max_retries);
    if !config.liveness_margin_ok(args.heartbeat_ms) {
        tracing::warn!(
            worker_timeout_ms = args.worker_timeout_ms,
            heartbeat_ms = args.heartbeat_ms,
            "Worker timeout is under three heartbeat intervals; healthy workers may be declared offline"
        );
    }

    let (handle, scheduler_task) = SchedulerService::spawn(config, shutdown.clone());

    let capacity = Resources::new(args.cpu, args.memory);
    let worker_config = WorkerConfig::new(args.heartbeat_ms).with_jitter_ms(args.heartbeat_ms / 10);
    let runner = SimulatedRunner::new(Duration::from_millis(args.step_ms), args.steps)
        .with_failure_rate(args.failure_rate);

    let mut agent_tokens = Vec::new();
    for id in 1..=args.workers {
        let token = spawn_agent(id, capacity, &handle, runner.clone(), worker_config, &shutdown);
        agent_tokens.push((id, token));
    }

    let mut job_ids = Vec::with_capacity(args.jobs);
    for n in 0..args.jobs {
        let cpu = 1 + (n as u32 % args.cpu.max(1));
        let memory = (args.memory / 4).max(1) * (1 + n as u64 % 2);
        let spec = JobSpec::new(format!("sim-{n}"))
            .with_priority((n % 3) as i32)
            .with_requirements(Resources::new(cpu, memory.min(args.memory)))
            .with_group(SIMULATION_GROUP);
        job_ids.push(handle.submit(spec).await?);
    }
    tracing::info!(jobs = job_ids.len(), workers = args.workers, "Simulation started");

    if let Some(victim) = args.kill_worker {
        let kill_after = Duration::from_millis(args.kill_after_ms);
        if let Some((_, token)) = agent_tokens.iter().find(|(id, _)| *id == victim) {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(kill_after).await;
                tracing::warn!(worker_id = victim, "Stopping worker");
                token.cancel();
            });
        } else {
            tracing::warn!(worker_id = victim, "No such worker to stop");
        }
    }

    let jobs = tokio::select! {
        jobs = collect_results(&handle, &job_ids) => jobs?,
        _ = shutdown.cancelled() => {
            return Err("interrupted before all jobs finished".into());
        }
    };

    let output = RunOutput {
        jobs: jobs.iter().map(JobOutput::from).collect(),
        summary: handle.cluster_summary().await?,
        group: handle.group_progress(SIMULATION_GROUP).await?,
    };
    print_output(&output, &args.output.output)?;

    shutdown.cancel();
    let _ = scheduler_task.await;
    Ok(())
}

async fn run_commands(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = install_shutdown_handler();
    let config = SchedulerConfig::default().with_default_max_retries(args.max_retries);
    let (handle, scheduler_task) = SchedulerService::spawn(config, shutdown.clone());

    spawn_agent(
        1,
        Resources::new(1, 1),
        &handle,
        CommandRunner::default(),
        WorkerConfig::default(),
        &shutdown,
    );

    let mut job_ids = Vec::with_capacity(args.commands.len());
    for command in &args.commands {
        let spec = JobSpec::new(command.as_str()).with_requirements(Resources::new(1, 1));
        job_ids.push(handle.submit(spec).await?);
    }

    let jobs = tokio::select! {
        jobs = collect_results(&handle, &job_ids) => jobs?,
        _ = shutdown.cancelled() => {
            return Err("interrupted before all jobs finished".into());
        }
    };
    let failed = jobs.iter().any(|j| j.status != JobStatus::Completed);

    let output = RunOutput {
        jobs: jobs.iter().map(JobOutput::from).collect(),
        summary: handle.cluster_summary().await?,
        group: None,
    };
    print_output(&output, &args.output.output)?;

    shutdown.cancel();
    let _ = scheduler_task.await;

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Commands::Simulate(simulate_args) => run_simulation(simulate_args).await?,
        Commands::Run(run_args) => run_commands(run_args).await?,
    }

    Ok(())
}
