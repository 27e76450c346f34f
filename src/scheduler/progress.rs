use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::scheduler::job::{JobId, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Active,
    Done(JobStatus),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    progress: u8,
    phase: Phase,
}

/// A worker's progress report for one job, carried on heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub percent: u8,
}

/// Aggregate completion of a group of jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProgress {
    pub group: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean per-job progress, completed jobs counting as 100.
    pub percent: u8,
}

impl GroupProgress {
    pub fn fraction_completed(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed + self.failed + self.cancelled == self.total
    }
}

/// Per-job progress from worker reports plus per-group aggregation.
///
/// Reports only land while a job is actively running; anything out of
/// range, regressing, or arriving after the job finished is dropped.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: HashMap<JobId, Entry>,
    groups: HashMap<String, BTreeSet<JobId>>,
    membership: HashMap<JobId, String>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, job_id: JobId, group: Option<&str>) {
        self.entries.insert(
            job_id,
            Entry {
                progress: 0,
                phase: Phase::Waiting,
            },
        );
        if let Some(group) = group {
            self.groups
                .entry(group.to_string())
                .or_default()
                .insert(job_id);
            self.membership.insert(job_id, group.to_string());
        }
    }

    /// A new attempt starts from zero.
    pub fn start(&mut self, job_id: &JobId) {
        if let Some(entry) = self.entries.get_mut(job_id) {
            if !matches!(entry.phase, Phase::Done(_)) {
                entry.progress = 0;
                entry.phase = Phase::Active;
            }
        }
    }

    /// The running attempt was abandoned; the job waits for reassignment.
    pub fn suspend(&mut self, job_id: &JobId) {
        if let Some(entry) = self.entries.get_mut(job_id) {
            if entry.phase == Phase::Active {
                entry.progress = 0;
                entry.phase = Phase::Waiting;
            }
        }
    }

    /// Apply a report. Returns the new value when it was accepted.
    pub fn update(&mut self, job_id: &JobId, percent: u8) -> Option<u8> {
        let entry = self.entries.get_mut(job_id)?;
        if entry.phase != Phase::Active || percent > 100 || percent < entry.progress {
            tracing::trace!(job_id = %job_id, percent, "Progress report ignored");
            return None;
        }
        entry.progress = percent;
        Some(percent)
    }

    pub fn finish(&mut self, job_id: &JobId, status: JobStatus) {
        if let Some(entry) = self.entries.get_mut(job_id) {
            if matches!(entry.phase, Phase::Done(_)) {
                return;
            }
            if status == JobStatus::Completed {
                entry.progress = 100;
            }
            entry.phase = Phase::Done(status);
        }
    }

    pub fn progress(&self, job_id: &JobId) -> Option<u8> {
        self.entries.get(job_id).map(|e| e.progress)
    }

    pub fn group(&self, group: &str) -> Option<GroupProgress> {
        let members = self.groups.get(group)?;
        let mut summary = GroupProgress {
            group: group.to_string(),
            total: members.len(),
            completed: 0,
            failed: 0,
            cancelled: 0,
            percent: 0,
        };
        let mut sum: u64 = 0;
        for entry in members.iter().filter_map(|id| self.entries.get(id)) {
            sum += u64::from(entry.progress);
            match entry.phase {
                Phase::Done(JobStatus::Completed) => summary.completed += 1,
                Phase::Done(JobStatus::Failed) => summary.failed += 1,
                Phase::Done(JobStatus::Cancelled) => summary.cancelled += 1,
                _ => {}
            }
        }
        if summary.total > 0 {
            summary.percent = (sum / summary.total as u64) as u8;
        }
        Some(summary)
    }

    /// Drop all knowledge of a job (used when pruning finished jobs).
    pub fn forget(&mut self, job_id: &JobId) {
        self.entries.remove(job_id);
        if let Some(group) = self.membership.remove(job_id) {
            if let Some(members) = self.groups.get_mut(&group) {
                members.remove(job_id);
                if members.is_empty() {
                    self.groups.remove(&group);
                }
            }
        }
    }
}
