use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Resources, WorkerId};

#[derive(Debug, Clone, Copy, Default)]
struct Ledger {
    capacity: Resources,
    allocated: Resources,
}

impl Ledger {
    fn spare(&self) -> Resources {
        self.capacity.saturating_sub(&self.allocated)
    }
}

/// Capacity accounting and admission control.
///
/// Worker capacity is the only contended resource in the cluster; every
/// change to it goes through `try_reserve` / `release`.
#[derive(Debug, Default)]
pub struct ResourceManager {
    ledgers: HashMap<WorkerId, Ledger>,
    cluster_cap: Option<Resources>,
    cluster_allocated: Resources,
    /// Every capacity any worker has ever registered with.
    seen_capacities: BTreeSet<Resources>,
}

impl ResourceManager {
    pub fn new(cluster_cap: Option<Resources>) -> Self {
        Self {
            cluster_cap,
            ..Default::default()
        }
    }

    /// Install (or reset) a worker's ledger with nothing allocated.
    pub fn set_capacity(&mut self, worker_id: WorkerId, capacity: Resources) {
        self.clear_allocations(worker_id);
        self.ledgers.insert(
            worker_id,
            Ledger {
                capacity,
                allocated: Resources::ZERO,
            },
        );
        self.seen_capacities.insert(capacity);
    }

    /// Drop everything allocated on a worker, returning it to the cluster.
    pub fn clear_allocations(&mut self, worker_id: WorkerId) {
        if let Some(ledger) = self.ledgers.get_mut(&worker_id) {
            self.cluster_allocated = self.cluster_allocated.saturating_sub(&ledger.allocated);
            ledger.allocated = Resources::ZERO;
        }
    }

    /// Atomically check and reserve `requirements` on a worker.
    ///
    /// Returns `Ok(false)` when the worker lacks the room, and
    /// `CapacityExceeded` when the reservation would push the cluster past
    /// its global ceiling.
    pub fn try_reserve(&mut self, worker_id: WorkerId, requirements: Resources) -> Result<bool> {
        let ledger = self
            .ledgers
            .get_mut(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound(worker_id))?;

        if !requirements.fits_within(&ledger.spare()) {
            return Ok(false);
        }

        if let Some(cap) = self.cluster_cap {
            let total = self.cluster_allocated.saturating_add(&requirements);
            if !total.fits_within(&cap) {
                return Err(SchedulerError::CapacityExceeded(format!(
                    "cluster ceiling {cap} reached ({} allocated, {requirements} requested)",
                    self.cluster_allocated
                )));
            }
        }

        ledger.allocated = ledger.allocated.saturating_add(&requirements);
        self.cluster_allocated = self.cluster_allocated.saturating_add(&requirements);
        Ok(true)
    }

    /// Reclaim capacity after completion, failure or cancellation.
    pub fn release(&mut self, worker_id: WorkerId, requirements: Resources) {
        match self.ledgers.get_mut(&worker_id) {
            Some(ledger) => {
                let freed = ledger.allocated.component_min(&requirements);
                ledger.allocated = ledger.allocated.saturating_sub(&freed);
                self.cluster_allocated = self.cluster_allocated.saturating_sub(&freed);
            }
            None => {
                tracing::warn!(worker_id, %requirements, "Release for unknown worker ignored");
            }
        }
    }

    pub fn spare(&self, worker_id: WorkerId) -> Option<Resources> {
        self.ledgers.get(&worker_id).map(Ledger::spare)
    }

    pub fn allocated(&self, worker_id: WorkerId) -> Option<Resources> {
        self.ledgers.get(&worker_id).map(|l| l.allocated)
    }

    pub fn capacity(&self, worker_id: WorkerId) -> Option<Resources> {
        self.ledgers.get(&worker_id).map(|l| l.capacity)
    }

    /// Room left under the global ceiling, if one is configured.
    pub fn cluster_headroom(&self) -> Option<Resources> {
        self.cluster_cap
            .map(|cap| cap.saturating_sub(&self.cluster_allocated))
    }

    pub fn cluster_allocated(&self) -> Resources {
        self.cluster_allocated
    }

    /// Whether a job with these requirements could ever be placed: it must
    /// fit under the cluster ceiling and inside at least one worker capacity
    /// seen so far. With no worker ever registered there is no evidence
    /// either way, so the answer is yes.
    pub fn could_ever_fit(&self, requirements: &Resources) -> bool {
        if let Some(cap) = self.cluster_cap {
            if !requirements.fits_within(&cap) {
                return false;
            }
        }
        self.seen_capacities.is_empty()
            || self
                .seen_capacities
                .iter()
                .any(|capacity| requirements.fits_within(capacity))
    }
}
