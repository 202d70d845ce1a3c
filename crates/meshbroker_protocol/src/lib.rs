//! Mesh Broker wire protocol: envelope framing over two ZMQ ROUTER sockets,
//! plus the shared data model that the queue, pool, and active-job
//! registry build on.
//!
//! # Envelope format
//!
//! ```text
//! [VERSION:1][SERVICE:1][JOBTYPE_IN:2][JOBTYPE_OUT:2][PAYLOAD_LEN:4][payload...]
//! ```
//!
//! Network byte order (big endian), 10-byte header. See [`codec`] for the
//! per-operation ASCII payload sub-encodings (job descriptor, job status,
//! job result, bare job id, CanMesh boolean).

pub mod codec;
pub mod config;
pub mod defaults;
pub mod domain;
pub mod error;

pub use codec::{IncomingMessage, ServiceType, HEADER_SIZE, PROTOCOL_VERSION};
pub use config::BrokerConfig;
pub use domain::{ActiveJob, Job, JobType, PeerIdentity, PendingWorker, Status, WorkerState};
pub use error::{ProtocolError, Result};

pub use meshbroker_ids::{IdParseError, JobId, JobIdGenerator};
