//! Registry of known and idle workers.

use meshbroker_protocol::{JobType, PeerIdentity};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker sent a data message without prior registration")]
    UnknownWorker,
}

#[derive(Debug, Clone)]
struct KnownWorker {
    job_type: JobType,
    expiry: Instant,
}

/// Two logical registries keyed by [`PeerIdentity`]: every worker that has
/// announced itself (`known`), and a per-type FIFO of idle workers ready
/// for dispatch (`ready`).
#[derive(Debug, Default)]
pub struct WorkerPool {
    known: HashMap<PeerIdentity, KnownWorker>,
    ready: HashMap<JobType, VecDeque<PeerIdentity>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent register; refreshes expiry on every call.
    pub fn add_worker(&mut self, identity: PeerIdentity, job_type: JobType, expiry_span: Duration) {
        self.known.insert(
            identity,
            KnownWorker {
                job_type,
                expiry: Instant::now() + expiry_span,
            },
        );
    }

    pub fn have_worker(&self, identity: &PeerIdentity) -> bool {
        self.known.contains_key(identity)
    }

    /// Resets expiry to `now + heartbeat_interval * expiry_multiplier`.
    /// No-op (returns `false`) if the worker isn't known.
    pub fn refresh_worker(&mut self, identity: &PeerIdentity, expiry_span: Duration) -> bool {
        match self.known.get_mut(identity) {
            Some(worker) => {
                worker.expiry = Instant::now() + expiry_span;
                true
            }
            None => false,
        }
    }

    /// Moves a known worker into the ready queue for its declared type.
    pub fn ready_for_work(&mut self, identity: &PeerIdentity) -> Result<(), WorkerPoolError> {
        let job_type = self
            .known
            .get(identity)
            .ok_or(WorkerPoolError::UnknownWorker)?
            .job_type;
        let queue = self.ready.entry(job_type).or_default();
        if !queue.contains(identity) {
            queue.push_back(identity.clone());
        }
        Ok(())
    }

    pub fn have_waiting_worker(&self, job_type: JobType) -> bool {
        self.ready.get(&job_type).is_some_and(|q| !q.is_empty())
    }

    /// Removes and returns the head of the ready queue for `job_type`,
    /// concurrently removing it from the known-workers registry because
    /// dispatch transfers ownership to `ActiveJobs`.
    pub fn take_worker(&mut self, job_type: JobType) -> Option<PeerIdentity> {
        let queue = self.ready.get_mut(&job_type)?;
        let identity = queue.pop_front()?;
        if queue.is_empty() {
            self.ready.remove(&job_type);
        }
        self.known.remove(&identity);
        Some(identity)
    }

    /// Drops every worker whose expiry has passed, from both registries,
    /// returning the identities dropped so callers can fail their
    /// `ActiveJobs`.
    pub fn purge_dead(&mut self, now: Instant) -> Vec<PeerIdentity> {
        let dead: Vec<PeerIdentity> = self
            .known
            .iter()
            .filter(|(_, w)| now > w.expiry)
            .map(|(id, _)| id.clone())
            .collect();

        for identity in &dead {
            self.known.remove(identity);
        }
        for queue in self.ready.values_mut() {
            queue.retain(|identity| !dead.contains(identity));
        }
        self.ready.retain(|_, queue| !queue.is_empty());

        dead
    }
}
