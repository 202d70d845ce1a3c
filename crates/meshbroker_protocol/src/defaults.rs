//! Canonical default values shared by the broker binary and its tests.

/// Default client-facing ROUTER bind address.
pub const DEFAULT_CLIENT_BIND_ADDR: &str = "tcp://127.0.0.1:50505";

/// Default worker-facing ROUTER bind address.
pub const DEFAULT_WORKER_BIND_ADDR: &str = "tcp://127.0.0.1:50510";

/// Host advertised to the worker factory for spawned workers to connect
/// back to.
pub const DEFAULT_ADVERTISED_HOST: &str = "127.0.0.1";

/// Poll timeout and base unit of liveness timing.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Number of heartbeat intervals a silent peer may survive before being
/// declared dead. Must be at least 3 so transient packet loss does not
/// cause a false death.
pub const DEFAULT_EXPIRY_MULTIPLIER: u32 = 5;

/// Default cap on concurrently spawned workers.
pub const DEFAULT_WORKER_CAP: usize = 4;
