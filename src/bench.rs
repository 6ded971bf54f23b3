//! Benchmark orchestration.
//!
//! Wires a `Listener` and a set of `ClientLoop`s onto their own contexts,
//! polls the shared `StatsCollector` until the run is over, then stops every
//! context and joins its workers.

use std::error::Error;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::client::ClientLoop;
use crate::config::{Config, Mode};
use crate::endpoint::Endpoint;
use crate::protocols::http::NotFoundHandler;
use crate::runtime::Context;
use crate::server::Listener;
use crate::session::SessionSettings;
use crate::stats::{Report, StatsCollector};

/// How often the completion check runs.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a stopping context waits for its workers.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Why a client run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    TargetReached,
    ClientsExited,
    Interrupted,
}

/// Run the configured mode. Returns the client report when clients ran.
pub fn run(config: &Config) -> Result<Option<Report>, Box<dyn Error>> {
    match config.mode {
        Mode::Server => {
            run_server(config)?;
            Ok(None)
        }
        Mode::Client => Ok(Some(run_clients(config, config.port)?)),
        Mode::Both => Ok(Some(run_both(config)?)),
    }
}

fn run_server(config: &Config) -> Result<(), Box<dyn Error>> {
    let (ctx, addr) = start_server(config)?;
    info!(address = %addr, "Serving until interrupted");
    ctx.block_on(interrupted());
    info!("Interrupt received, stopping server");
    ctx.stop(STOP_GRACE);
    Ok(())
}

fn run_both(config: &Config) -> Result<Report, Box<dyn Error>> {
    let (server, addr) = start_server(config)?;
    let report = run_clients(config, addr.port());
    server.stop(STOP_GRACE);
    report
}

/// Bind the listener and start accepting on a fresh server context.
fn start_server(config: &Config) -> Result<(Context, SocketAddr), Box<dyn Error>> {
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}:{} resolved to no addresses", config.host, config.port),
            )
        })?;

    let ctx = Context::new("server", config.threads)?;
    let settings = SessionSettings {
        head_limit: config.head_limit,
        body_limit: config.body_limit,
        queue_limit: config.queue_limit,
        timeout: config.server_timeout,
    };
    let listener = ctx.block_on(async {
        Listener::bind(addr, NotFoundHandler, settings, config.max_connections)
    })?;
    let local_addr = listener.local_addr();
    ctx.spawn(listener.run());

    Ok((ctx, local_addr))
}

/// Run `config.clients` client loops against `port` until the run is over.
fn run_clients(config: &Config, port: u16) -> Result<Report, Box<dyn Error>> {
    let mut stats = StatsCollector::new();
    stats.configure(config.requests, config.clients, config.threads);
    let stats = Arc::new(stats);

    let ctx = Context::new("client", config.threads)?;
    let active = Arc::new(AtomicUsize::new(config.clients));

    info!(
        requests = stats.target(),
        clients = config.clients,
        threads = ctx.threads(),
        host = %config.host,
        port,
        path = %config.path,
        "Starting clients"
    );

    for id in 0..config.clients {
        let client = ClientLoop::new(
            id,
            Endpoint::new(config.host.clone(), port),
            &config.path,
            Arc::clone(&stats),
            config.client_timeout,
        );
        let active = Arc::clone(&active);
        ctx.spawn(async move {
            let _ = client.run().await;
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    let finish = ctx.block_on(wait_for_completion(&stats, &active));
    match finish {
        Finish::TargetReached => info!(completed = stats.completed(), "Target reached"),
        Finish::ClientsExited => warn!(
            completed = stats.completed(),
            requests = stats.target(),
            "Every client exited before the target was reached"
        ),
        Finish::Interrupted => info!(completed = stats.completed(), "Interrupted"),
    }
    ctx.stop(STOP_GRACE);

    Ok(stats.report())
}

/// Poll until the target is reached, every client has exited, or the
/// process is interrupted.
async fn wait_for_completion(stats: &StatsCollector, active: &AtomicUsize) -> Finish {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let interrupt = interrupted();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => return Finish::Interrupted,
            _ = ticker.tick() => {
                if stats.is_target_reached() {
                    return Finish::TargetReached;
                }
                if active.load(Ordering::Acquire) == 0 {
                    return Finish::ClientsExited;
                }
            }
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for interrupt");
        std::future::pending::<()>().await;
    }
}
