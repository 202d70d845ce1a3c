//! Core data model shared by the job queue, worker pool, and active-job
//! registry.

use meshbroker_ids::JobId;
use std::sync::Arc;
use std::time::Instant;

/// An opaque categorical tag describing the kind of work required: input
/// format paired with output format. `Copy + Eq + Ord + Hash` so it can key
/// `HashMap`/`BTreeMap` collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobType {
    pub input_format: u16,
    pub output_format: u16,
}

impl JobType {
    pub const fn new(input_format: u16, output_format: u16) -> Self {
        Self {
            input_format,
            output_format,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.input_format, self.output_format)
    }
}

/// An opaque byte string assigned by the ROUTER transport to each connected
/// peer. Equality/hash only — not meaningful to compare or order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity(pub Vec<u8>);

impl PeerIdentity {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex_preview(&self.0))
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// A queued job awaiting dispatch. Immutable once queued;
/// payload bytes are shared (`Arc<[u8]>`) so handing a job off to a worker
/// never copies the mesh payload.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: Arc<[u8]>,
}

/// The lifecycle state of a dispatched job. `Finished` is
/// reached only via [`crate::domain::ActiveJob`] receiving a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Queued = 0,
    InProgress = 1,
    Finished = 2,
    Failed = 3,
    Invalid = 4,
}

impl Status {
    pub fn to_code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Status::Queued),
            1 => Some(Status::InProgress),
            2 => Some(Status::Finished),
            3 => Some(Status::Failed),
            4 => Some(Status::Invalid),
            _ => None,
        }
    }
}

/// A job that has been handed to a worker. Mutated by incoming
/// worker status/result messages and by heartbeat refreshes.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: JobId,
    pub job_type: JobType,
    pub worker: PeerIdentity,
    pub expiry: Instant,
    pub status: Status,
    pub result: Option<Arc<[u8]>>,
}

/// The registration state of a worker not yet handed a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Registered,
    ReadyForWork,
}

/// A worker that has announced a capability but has not yet received a job.
/// Mutated by heartbeats and state transitions.
#[derive(Debug, Clone)]
pub struct PendingWorker {
    pub identity: PeerIdentity,
    pub job_type: JobType,
    pub expiry: Instant,
    pub state: WorkerState,
}
