//! beast-bench: a pipelined HTTP/1.1 server and keep-alive load generator
//!
//! The server answers every request with a fixed response, pipelining
//! responses in request order with bounded per-connection queues. The
//! client side runs N simulated keep-alive clients against it and reports
//! throughput once the request target is reached.
//!
//! Features:
//! - Server, client, or both in one process
//! - Backpressure on pipelined requests
//! - Content-Length and chunked bodies
//! - Configuration via CLI arguments or TOML file

mod bench;
mod client;
mod config;
mod endpoint;
mod error;
mod protocols;
mod runtime;
mod server;
mod session;
mod stats;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        mode = ?config.mode,
        host = %config.host,
        port = config.port,
        threads = config.threads,
        requests = config.requests,
        clients = config.clients,
        "Starting beast-bench"
    );

    if let Some(report) = bench::run(&config)? {
        println!("{report}");
    }

    Ok(())
}
