//! Scheduler bookkeeping: jobs, slots, FIFO queue, per-batch counters.
//!
//! Plain data guarded by the scheduler's mutex; nothing in here spawns or awaits.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use crate::job::{BatchId, DownloadJob, JobId, JobState};

/// A running job's slot.
#[derive(Debug, Default)]
pub(super) struct ActiveSlot {
    /// Set by `cancel_all`; the job ends as Cancelled whatever its worker reports.
    pub(super) cancel_requested: bool,
}

/// Completion counters of one logical batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct BatchCounter {
    pub(super) total: usize,
    pub(super) succeeded: usize,
    pub(super) failed: usize,
}

impl BatchCounter {
    pub(super) fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub(super) fn is_complete(&self) -> bool {
        self.total > 0 && self.completed() >= self.total
    }

    pub(super) fn record(&mut self, state: JobState) {
        match state {
            JobState::Succeeded => self.succeeded += 1,
            _ => self.failed += 1,
        }
    }
}

/// Ids of running and waiting jobs at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub capacity: usize,
    pub download_dir: PathBuf,
    /// Running jobs, ascending by id.
    pub active: Vec<JobId>,
    /// Waiting jobs in admission order.
    pub pending: Vec<JobId>,
}

#[derive(Debug)]
pub(super) struct SchedulerState {
    pub(super) capacity: usize,
    pub(super) download_dir: PathBuf,
    next_job: u64,
    next_batch: u64,
    /// Batch that plain `submit` calls join until it completes.
    pub(super) adhoc_batch: Option<BatchId>,
    /// Live (non-terminal) jobs.
    pub(super) jobs: HashMap<JobId, DownloadJob>,
    pub(super) active: HashMap<JobId, ActiveSlot>,
    pub(super) pending: VecDeque<JobId>,
    pub(super) batches: HashMap<BatchId, BatchCounter>,
}

impl SchedulerState {
    pub(super) fn new(capacity: usize, download_dir: PathBuf) -> Self {
        Self {
            capacity: capacity.max(1),
            download_dir,
            next_job: 1,
            next_batch: 1,
            adhoc_batch: None,
            jobs: HashMap::new(),
            active: HashMap::new(),
            pending: VecDeque::new(),
            batches: HashMap::new(),
        }
    }

    pub(super) fn next_job_id(&mut self) -> JobId {
        let id = JobId(self.next_job);
        self.next_job += 1;
        id
    }

    /// Opens a new, empty batch.
    pub(super) fn open_batch(&mut self) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        self.batches.insert(id, BatchCounter::default());
        id
    }

    /// The ad-hoc batch, opened on demand.
    pub(super) fn adhoc_batch(&mut self) -> BatchId {
        match self.adhoc_batch {
            Some(id) if self.batches.contains_key(&id) => id,
            _ => {
                let id = self.open_batch();
                self.adhoc_batch = Some(id);
                id
            }
        }
    }

    /// Forgets a batch once its completion has been reported.
    pub(super) fn close_batch(&mut self, batch: BatchId) -> Option<BatchCounter> {
        if self.adhoc_batch == Some(batch) {
            self.adhoc_batch = None;
        }
        self.batches.remove(&batch)
    }

    /// Drops every batch counter (used by `cancel_all`).
    pub(super) fn reset_batches(&mut self) {
        self.batches.clear();
        self.adhoc_batch = None;
    }

    pub(super) fn has_free_slot(&self) -> bool {
        self.active.len() < self.capacity
    }

    /// Next job to admit, if a slot is free and one is waiting.
    pub(super) fn next_admission(&mut self) -> Option<JobId> {
        if !self.has_free_slot() {
            return None;
        }
        self.pending.pop_front()
    }

    pub(super) fn is_idle(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }

    pub(super) fn snapshot(&self) -> QueueSnapshot {
        let mut active: Vec<JobId> = self.active.keys().copied().collect();
        active.sort();
        QueueSnapshot {
            capacity: self.capacity,
            download_dir: self.download_dir.clone(),
            active,
            pending: self.pending.iter().copied().collect(),
        }
    }
}
