use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;
pub type WorkerId = u64;

/// CPU and memory units. Used both for job requirements and worker capacity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Resources {
    pub cpu: u32,
    pub memory: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources { cpu: 0, memory: 0 };

    pub fn new(cpu: u32, memory: u64) -> Self {
        Self { cpu, memory }
    }

    /// True when `self` fits inside `available` on every dimension.
    pub fn fits_within(&self, available: &Resources) -> bool {
        self.cpu <= available.cpu && self.memory <= available.memory
    }

    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_add(other.cpu),
            memory: self.memory.saturating_add(other.memory),
        }
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_sub(other.cpu),
            memory: self.memory.saturating_sub(other.memory),
        }
    }

    /// Per-dimension minimum. Not `Ord::min`, which compares whole structs.
    pub fn component_min(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.min(other.cpu),
            memory: self.memory.min(other.memory),
        }
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}cpu/{}mem", self.cpu, self.memory)
    }
}

/// Opaque descriptor of the work a job performs. The scheduler stores and
/// forwards it but never looks inside; interpreting it is the runner's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadRef(pub String);

impl PayloadRef {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    /// Cancel requested while running; waiting for the worker to acknowledge.
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Cancelling => write!(f, "cancelling"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a worker reports back for an execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded { detail: Option<String> },
    Failed { error: String },
    /// Acknowledges a cancel instruction.
    Cancelled,
}

/// Submission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub priority: i32,
    pub requirements: Resources,
    pub max_retries: Option<u32>,
    pub payload: PayloadRef,
    pub group: Option<String>,
}

impl JobSpec {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            priority: 0,
            requirements: Resources::ZERO,
            max_retries: None,
            payload: PayloadRef::new(payload),
            group: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requirements(mut self, requirements: Resources) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub priority: i32,
    pub requirements: Resources,
    pub payload: PayloadRef,
    pub group: Option<String>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub max_retries: u32,
    /// Number of times the job has been handed to a worker.
    pub attempts: u32,
    pub assigned_worker: Option<WorkerId>,
    /// Worker that produced the terminal outcome, if any.
    pub executed_by: Option<WorkerId>,
    pub progress: u8,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(spec: JobSpec, default_max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: spec.priority,
            requirements: spec.requirements,
            payload: spec.payload,
            group: spec.group,
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retries: 0,
            attempts: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            assigned_worker: None,
            executed_by: None,
            progress: 0,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
