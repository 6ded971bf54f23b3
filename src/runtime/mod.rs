//! Event-dispatch contexts and per-connection state.
//!
//! Each role (server, client) runs on its own multi-threaded tokio runtime.
//! Every session and client loop is a single spawned task, which gives it
//! strand semantics: its operations never run concurrently with each other,
//! whichever worker thread happens to poll it.
//!
//! Shared abstractions:
//! - `Context`: one runtime plus its worker threads
//! - `WorkQueue`: bounded response pipeline of a session
//! - `SessionState` / `ClientPhase`: connection state machines

mod connection;
pub mod queue;

pub use connection::{ClientPhase, SessionState};
pub use queue::{Completion, WorkItem, WorkQueue, QUEUE_LIMIT};

use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

/// An event-dispatch context: a tokio runtime driven by `threads` workers.
pub struct Context {
    name: &'static str,
    threads: usize,
    runtime: Runtime,
}

impl Context {
    pub fn new(name: &'static str, threads: usize) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(format!("{name}-worker"))
            .enable_all()
            .build()?;

        debug!(context = name, threads, "Context started");

        Ok(Self {
            name,
            threads,
            runtime,
        })
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Drive `future` to completion on the calling thread inside this context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Stop the context. Every in-flight operation is cancelled and the
    /// worker threads are joined (waiting at most `grace`).
    pub fn stop(self, grace: Duration) {
        debug!(context = self.name, "Stopping context");
        self.runtime.shutdown_timeout(grace);
    }
}

/// Run an I/O operation with a deadline; expiry becomes `ErrorKind::TimedOut`.
pub async fn with_timeout<T, F>(limit: Duration, op: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::time::timeout(limit, op)
        .await
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out")))
}

/// Number of worker threads to use when none is configured.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
