//! Registry of dispatched jobs, their workers, status, and results.

use meshbroker_protocol::{ActiveJob, JobId, JobType, PeerIdentity, Status};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActiveJobsError {
    #[error("job id not found in the active registry")]
    UnknownJob,
}

/// Jobs currently assigned to a worker, keyed by [`JobId`].
#[derive(Debug, Default)]
pub struct ActiveJobs {
    jobs: HashMap<JobId, ActiveJob>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly dispatched job. Initial status is `InProgress`;
    /// expiry is `now + heartbeat_interval * expiry_multiplier`.
    pub fn add(&mut self, worker: PeerIdentity, id: JobId, job_type: JobType, expiry_span: Duration) {
        self.jobs.insert(
            id,
            ActiveJob {
                id,
                job_type,
                worker,
                expiry: Instant::now() + expiry_span,
                status: Status::InProgress,
                result: None,
            },
        );
    }

    pub fn have_id(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn have_result(&self, id: JobId) -> bool {
        self.jobs.get(&id).is_some_and(|j| j.result.is_some())
    }

    pub fn status(&self, id: JobId) -> Result<Status, ActiveJobsError> {
        self.jobs
            .get(&id)
            .map(|j| j.status)
            .ok_or(ActiveJobsError::UnknownJob)
    }

    pub fn result(&self, id: JobId) -> Result<Option<Arc<[u8]>>, ActiveJobsError> {
        self.jobs
            .get(&id)
            .map(|j| j.result.clone())
            .ok_or(ActiveJobsError::UnknownJob)
    }

    pub fn worker_address(&self, id: JobId) -> Result<PeerIdentity, ActiveJobsError> {
        self.jobs
            .get(&id)
            .map(|j| j.worker.clone())
            .ok_or(ActiveJobsError::UnknownJob)
    }

    /// Overwrites status for `id`; silently ignores unknown ids, since a
    /// worker may briefly outlive removal.
    pub fn update_status(&mut self, id: JobId, status: Status) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.status = status;
        }
    }

    /// Stores the result and transitions status to `Finished`. Silently
    /// ignores unknown ids for the same reason as `update_status`.
    pub fn update_result(&mut self, id: JobId, result: Arc<[u8]>) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.result = Some(result);
            job.status = Status::Finished;
        }
    }

    /// Extends expiry on every active job owned by `worker`. Called on any
    /// worker message.
    pub fn refresh(&mut self, worker: &PeerIdentity, expiry_span: Duration) {
        let deadline = Instant::now() + expiry_span;
        for job in self.jobs.values_mut() {
            if &job.worker == worker {
                job.expiry = deadline;
            }
        }
    }

    /// Transitions every job whose expiry is past to `Failed`: a purged
    /// worker's jobs never retain `InProgress`.
    pub fn mark_expired(&mut self, now: Instant) {
        for job in self.jobs.values_mut() {
            if job.status == Status::InProgress && now > job.expiry {
                job.status = Status::Failed;
            }
        }
    }

    /// Fails every in-progress job owned by `worker` immediately,
    /// regardless of its individual expiry. Called when `WorkerPool`
    /// purges a worker, so a liveness race between the pool's and the
    /// registry's independent expiry clocks can never leave a job
    /// `InProgress` with no live owner.
    pub fn fail_all_for_worker(&mut self, worker: &PeerIdentity) {
        for job in self.jobs.values_mut() {
            if &job.worker == worker && job.status == Status::InProgress {
                job.status = Status::Failed;
            }
        }
    }

    pub fn remove(&mut self, id: JobId) -> Option<ActiveJob> {
        self.jobs.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbroker_ids::JobIdGenerator;

    fn id(n: u8) -> PeerIdentity {
        PeerIdentity(vec![n])
    }

    #[test]
    fn finished_only_via_update_result() {
        let gen = JobIdGenerator::new();
        let jid = gen.next();
        let mut active = ActiveJobs::new();
        active.add(id(1), jid, JobType::new(1, 1), Duration::from_secs(10));
        assert_eq!(active.status(jid).unwrap(), Status::InProgress);
        active.update_result(jid, Arc::from(b"xyz".as_slice()));
        assert_eq!(active.status(jid).unwrap(), Status::Finished);
        assert_eq!(&*active.result(jid).unwrap().unwrap(), b"xyz");
    }

    #[test]
    fn update_status_ignores_unknown_id() {
        let gen = JobIdGenerator::new();
        let mut active = ActiveJobs::new();
        active.update_status(gen.next(), Status::Failed); // must not panic
    }

    #[test]
    fn mark_expired_fails_stale_jobs_only() {
        let gen = JobIdGenerator::new();
        let mut active = ActiveJobs::new();
        let stale = gen.next();
        let fresh = gen.next();
        active.add(id(1), stale, JobType::new(1, 1), Duration::from_millis(0));
        active.add(id(2), fresh, JobType::new(1, 1), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(5));
        active.mark_expired(Instant::now());
        assert_eq!(active.status(stale).unwrap(), Status::Failed);
        assert_eq!(active.status(fresh).unwrap(), Status::InProgress);
    }

    #[test]
    fn fail_all_for_worker_is_immediate() {
        let gen = JobIdGenerator::new();
        let mut active = ActiveJobs::new();
        let jid = gen.next();
        active.add(id(1), jid, JobType::new(1, 1), Duration::from_secs(60));
        active.fail_all_for_worker(&id(1));
        assert_eq!(active.status(jid).unwrap(), Status::Failed);
    }

    #[test]
    fn unknown_job_queries_error() {
        let gen = JobIdGenerator::new();
        let active = ActiveJobs::new();
        assert_eq!(active.status(gen.next()), Err(ActiveJobsError::UnknownJob));
    }
}
