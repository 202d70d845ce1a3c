//! Mesh Broker
//!
//! Core of a distributed meshing-job brokerage system: accepts job
//! submissions from clients, queues them by job type, tracks worker
//! liveness through heartbeat exchange, dispatches jobs to compatible
//! workers (spawning new workers on demand through an external factory),
//! and returns results or status to clients asynchronously.

pub mod active_jobs;
pub mod broker;
pub mod factory;
pub mod job_queue;
pub mod metrics;
pub mod worker_pool;

pub use active_jobs::{ActiveJobs, ActiveJobsError};
pub use broker::Broker;
pub use factory::{NoopWorkerFactory, ProcessWorkerFactory, WorkerFactory};
pub use job_queue::{JobQueue, JobQueueError};
pub use metrics::METRICS;
pub use worker_pool::{WorkerPool, WorkerPoolError};

pub use meshbroker_protocol::BrokerConfig;

#[derive(clap::Parser, Debug)]
#[command(name = "meshbroker", about = "Distributed meshing-job broker")]
pub struct BrokerArgs {
    /// ZMQ ROUTER bind address for clients.
    #[arg(
        long,
        env = "MESHBROKER_CLIENT_BIND",
        default_value_t = meshbroker_protocol::defaults::DEFAULT_CLIENT_BIND_ADDR.to_string()
    )]
    pub client_bind: String,

    /// ZMQ ROUTER bind address for workers.
    #[arg(
        long,
        env = "MESHBROKER_WORKER_BIND",
        default_value_t = meshbroker_protocol::defaults::DEFAULT_WORKER_BIND_ADDR.to_string()
    )]
    pub worker_bind: String,

    /// Host advertised to the worker factory for spawned workers to
    /// connect back to.
    #[arg(
        long,
        env = "MESHBROKER_ADVERTISED_HOST",
        default_value_t = meshbroker_protocol::defaults::DEFAULT_ADVERTISED_HOST.to_string()
    )]
    pub advertised_host: String,

    /// Poll period and base unit of liveness timing, in milliseconds.
    #[arg(
        long,
        env = "MESHBROKER_HEARTBEAT_INTERVAL_MS",
        default_value_t = meshbroker_protocol::defaults::DEFAULT_HEARTBEAT_INTERVAL_MS
    )]
    pub heartbeat_interval_ms: u64,

    /// Number of heartbeat intervals a silent peer may survive. Must be
    /// at least 3.
    #[arg(
        long,
        env = "MESHBROKER_EXPIRY_MULTIPLIER",
        default_value_t = meshbroker_protocol::defaults::DEFAULT_EXPIRY_MULTIPLIER
    )]
    pub expiry_multiplier: u32,

    /// Maximum number of concurrently spawned workers.
    #[arg(
        long,
        env = "MESHBROKER_WORKER_CAP",
        default_value_t = meshbroker_protocol::defaults::DEFAULT_WORKER_CAP
    )]
    pub worker_cap: usize,

    /// External command used to spawn worker processes. If unset, the
    /// broker runs with a no-op factory that reports no support for any
    /// job type — useful for tests and brokers fed only by pre-registered
    /// workers.
    #[arg(long, env = "MESHBROKER_WORKER_CMD")]
    pub worker_cmd: Option<String>,

    /// Enable verbose (debug-level) console logging.
    #[arg(long)]
    pub verbose: bool,
}

impl From<BrokerArgs> for BrokerConfig {
    fn from(args: BrokerArgs) -> Self {
        BrokerConfig {
            client_bind_addr: args.client_bind,
            worker_bind_addr: args.worker_bind,
            advertised_host: args.advertised_host,
            heartbeat_interval: std::time::Duration::from_millis(args.heartbeat_interval_ms),
            expiry_multiplier: args.expiry_multiplier.max(3),
            worker_cap: args.worker_cap,
            worker_cmd: args.worker_cmd,
        }
    }
}
