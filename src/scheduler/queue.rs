use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Job, JobId, Resources};

/// Ordering key: higher priority first, then sequence ascending.
/// Fresh submissions take increasing positive sequence numbers; requeued
/// jobs take decreasing negative ones so they sort ahead of their band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    band: Reverse<i32>,
    seq: i64,
}

/// A pending job as seen by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: JobId,
    pub priority: i32,
    pub requirements: Resources,
    key: QueueKey,
}

/// Priority-ordered admission structure holding pending jobs.
#[derive(Debug)]
pub struct JobQueue {
    entries: BTreeMap<QueueKey, QueuedJob>,
    index: HashMap<JobId, QueueKey>,
    next_tail: i64,
    next_head: i64,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_tail: 0,
            next_head: -1,
        }
    }

    /// Insert at the tail of the job's priority band. Returns false if the
    /// job is already queued.
    pub fn enqueue(&mut self, job: &Job) -> bool {
        let seq = self.next_tail;
        self.next_tail += 1;
        self.insert(job, seq)
    }

    /// Insert at the head of the job's priority band, for prompt reattempt
    /// after a failure. The caller has already bumped `retries`.
    pub fn requeue(&mut self, job: &Job) -> bool {
        let seq = self.next_head;
        self.next_head -= 1;
        self.insert(job, seq)
    }

    fn insert(&mut self, job: &Job, seq: i64) -> bool {
        if self.index.contains_key(&job.id) {
            return false;
        }
        let key = QueueKey {
            band: Reverse(job.priority),
            seq,
        };
        self.index.insert(job.id, key);
        self.entries.insert(
            key,
            QueuedJob {
                id: job.id,
                priority: job.priority,
                requirements: job.requirements,
                key,
            },
        );
        true
    }

    /// Remove and return the first job, in priority order, whose requirements
    /// fit at least one of the given spare capacities. Jobs that fit nowhere
    /// are skipped and stay queued, so they never block lower bands.
    pub fn dequeue_eligible(&mut self, available: &[Resources]) -> Option<QueuedJob> {
        if available.is_empty() {
            return None;
        }
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| {
                available
                    .iter()
                    .any(|spare| entry.requirements.fits_within(spare))
            })
            .map(|(key, _)| *key)?;

        let entry = self.entries.remove(&key)?;
        self.index.remove(&entry.id);
        Some(entry)
    }

    /// Put a dequeued entry back at exactly the position it was taken from.
    pub fn restore(&mut self, entry: QueuedJob) {
        if self.index.contains_key(&entry.id) {
            return;
        }
        self.index.insert(entry.id, entry.key);
        self.entries.insert(entry.key, entry);
    }

    /// Remove a queued job, e.g. on cancellation.
    pub fn remove(&mut self, job_id: &JobId) -> Result<QueuedJob> {
        let key = self
            .index
            .remove(job_id)
            .ok_or(SchedulerError::JobNotFound(*job_id))?;
        self.entries
            .remove(&key)
            .ok_or(SchedulerError::JobNotFound(*job_id))
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.index.contains_key(job_id)
    }

    /// Queued job ids in retrieval order.
    pub fn ordered_ids(&self) -> Vec<JobId> {
        self.entries.values().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
