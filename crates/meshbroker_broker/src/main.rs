//! Mesh Broker (Rust)
//!
//! Broker server for a distributed meshing-job brokerage system.
//!
//! Usage:
//!     meshbroker --client-bind tcp://127.0.0.1:50505 --worker-bind tcp://127.0.0.1:50510

use clap::Parser;
use meshbroker_broker::{Broker, BrokerArgs, BrokerConfig};

fn main() -> anyhow::Result<()> {
    let args = BrokerArgs::parse();

    meshbroker_logging::init_logging(meshbroker_logging::LogConfig {
        app_name: "meshbroker",
        verbose: args.verbose,
    })?;

    tracing::info!("Starting Mesh Broker");
    tracing::info!("  Client bind:  {}", args.client_bind);
    tracing::info!("  Worker bind:  {}", args.worker_bind);
    tracing::info!("  Heartbeat:    {}ms", args.heartbeat_interval_ms);
    tracing::info!("  Expiry mult.: {}x", args.expiry_multiplier);
    tracing::info!("  Worker cap:   {}", args.worker_cap);

    let config: BrokerConfig = args.into();
    let mut broker = Broker::bind(config)?;
    broker.run()
}
