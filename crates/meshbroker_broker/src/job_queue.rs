//! Jobs awaiting dispatch, keyed by type.

use meshbroker_protocol::{Job, JobId, JobType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobQueueError {
    #[error("no queued job of the requested type")]
    NoJob,
}

/// FIFO-per-type queue of submitted, not-yet-dispatched jobs.
///
/// Invariant: a `JobId` appears in at most one of `JobQueue` and
/// `ActiveJobs` at any moment — this module upholds its half by removing
/// the job from its index the instant it is taken or explicitly removed.
#[derive(Debug, Default)]
pub struct JobQueue {
    by_type: HashMap<JobType, VecDeque<Job>>,
    index: HashMap<JobId, JobType>,
    waiting_for_worker: HashSet<JobType>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a newly submitted job. Constant-time amortized.
    pub fn add_job(&mut self, id: JobId, job_type: JobType, payload: Arc<[u8]>) {
        self.by_type.entry(job_type).or_default().push_back(Job {
            id,
            job_type,
            payload,
        });
        self.index.insert(id, job_type);
    }

    pub fn have_id(&self, id: JobId) -> bool {
        self.index.contains_key(&id)
    }

    /// The set of types that currently have at least one queued job.
    pub fn queued_job_types(&self) -> HashSet<JobType> {
        self.by_type
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(t, _)| *t)
            .collect()
    }

    /// The subset of queued types for which a worker has already been
    /// requested from the factory but not yet appeared. Used by the
    /// dispatch loop to avoid double-requesting.
    pub fn waiting_for_worker_types(&self) -> HashSet<JobType> {
        let queued = self.queued_job_types();
        self.waiting_for_worker
            .intersection(&queued)
            .copied()
            .collect()
    }

    /// Marks that a factory request has been issued for `job_type`.
    pub fn worker_dispatched(&mut self, job_type: JobType) {
        self.waiting_for_worker.insert(job_type);
    }

    /// Removes and returns the oldest job of `job_type` (FIFO within a
    /// type; no ordering guarantee across types).
    pub fn take_job(&mut self, job_type: JobType) -> Result<Job, JobQueueError> {
        let queue = self.by_type.get_mut(&job_type).ok_or(JobQueueError::NoJob)?;
        let job = queue.pop_front().ok_or(JobQueueError::NoJob)?;
        self.index.remove(&job.id);
        if queue.is_empty() {
            self.by_type.remove(&job_type);
            self.waiting_for_worker.remove(&job_type);
        }
        Ok(job)
    }

    /// Removes by id, returning whether it was present.
    pub fn remove(&mut self, id: JobId) -> bool {
        let Some(job_type) = self.index.remove(&id) else {
            return false;
        };
        if let Some(queue) = self.by_type.get_mut(&job_type) {
            queue.retain(|job| job.id != id);
            if queue.is_empty() {
                self.by_type.remove(&job_type);
                self.waiting_for_worker.remove(&job_type);
            }
        }
        true
    }
}
