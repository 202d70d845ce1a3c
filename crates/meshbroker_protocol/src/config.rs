//! Broker configuration shared across the binary, library, and tests.

use crate::defaults::{
    DEFAULT_ADVERTISED_HOST, DEFAULT_CLIENT_BIND_ADDR, DEFAULT_EXPIRY_MULTIPLIER,
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_WORKER_BIND_ADDR, DEFAULT_WORKER_CAP,
};
use std::time::Duration;

/// Canonical broker configuration, assembled from CLI args / environment by
/// the `meshbroker` binary and used directly by tests that bind a `Broker`
/// in-process.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub client_bind_addr: String,
    pub worker_bind_addr: String,
    pub advertised_host: String,
    pub heartbeat_interval: Duration,
    pub expiry_multiplier: u32,
    pub worker_cap: usize,
    /// External command used to spawn worker processes. `None` yields a
    /// no-op factory that never reports support for any job type (useful
    /// for tests and for brokers fed only by pre-registered workers).
    pub worker_cmd: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_bind_addr: DEFAULT_CLIENT_BIND_ADDR.to_string(),
            worker_bind_addr: DEFAULT_WORKER_BIND_ADDR.to_string(),
            advertised_host: DEFAULT_ADVERTISED_HOST.to_string(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            expiry_multiplier: DEFAULT_EXPIRY_MULTIPLIER,
            worker_cap: DEFAULT_WORKER_CAP,
            worker_cmd: None,
        }
    }
}

impl BrokerConfig {
    /// The expiry span granted to a freshly (re)registered worker or
    /// dispatched job: `heartbeat_interval * expiry_multiplier`.
    pub fn expiry_span(&self) -> Duration {
        self.heartbeat_interval * self.expiry_multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_multiplier_meets_minimum() {
        assert!(BrokerConfig::default().expiry_multiplier >= 3);
    }
}
