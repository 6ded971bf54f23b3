//! TCP listener for the benchmark server.
//!
//! Accepts connections indefinitely and runs one `ServerSession` task per
//! connection. Bind failures are returned before the accept loop starts;
//! accept failures are logged and the loop carries on.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, debug_span, error, info, Instrument};

use crate::error::BindError;
use crate::protocols::http::Handler;
use crate::session::{ServerSession, SessionSettings};

/// Default maximum number of concurrent connections
pub const MAX_CONNECTIONS: usize = 10_000;

/// Listen backlog
const BACKLOG: i32 = 1024;

pub struct Listener<H> {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<H>,
    settings: SessionSettings,
    connection_limit: Arc<Semaphore>,
}

impl<H: Handler> Listener<H> {
    /// Bind and start listening on `addr`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        handler: H,
        settings: SessionSettings,
        max_connections: usize,
    ) -> Result<Self, BindError> {
        let std_listener = create_listener(addr)?;
        let listener = TcpListener::from_std(std_listener).map_err(|source| BindError {
            op: "register",
            addr,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| BindError {
            op: "query",
            addr,
            source,
        })?;

        Ok(Self {
            listener,
            local_addr,
            handler: Arc::new(handler),
            settings,
            connection_limit: Arc::new(Semaphore::new(max_connections.max(1))),
        })
    }

    /// The bound address (resolves a requested port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever.
    pub async fn run(self) {
        info!(address = %self.local_addr, "Server listening");

        loop {
            // Wait for a connection slot
            let Ok(permit) = Arc::clone(&self.connection_limit).acquire_owned().await else {
                return;
            };

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let session =
                        ServerSession::new(stream, Arc::clone(&self.handler), self.settings);
                    tokio::spawn(
                        async move {
                            session.run().await;
                            debug!("Connection closed");
                            drop(permit);
                        }
                        .instrument(debug_span!("session", peer = %peer)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

fn create_listener(addr: SocketAddr) -> Result<std::net::TcpListener, BindError> {
    let wrap = |op: &'static str| move |source: io::Error| BindError { op, addr, source };

    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(wrap("open"))?;

    socket.set_reuse_address(true).map_err(wrap("configure"))?;
    socket.set_nonblocking(true).map_err(wrap("configure"))?;
    socket.bind(&addr.into()).map_err(wrap("bind"))?;
    socket.listen(BACKLOG).map_err(wrap("listen"))?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::http::NotFoundHandler;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_bind_reports_port() {
        let listener = Listener::bind(
            loopback(),
            NotFoundHandler,
            SessionSettings::default(),
            MAX_CONNECTIONS,
        )
        .unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let taken = std::net::TcpListener::bind(loopback()).unwrap();
        let addr = taken.local_addr().unwrap();

        let err = Listener::bind(addr, NotFoundHandler, SessionSettings::default(), 1)
            .err()
            .expect("bind should fail");
        assert_eq!(err.op, "bind");
        assert_eq!(err.addr, addr);
    }

    #[tokio::test]
    async fn test_serves_concurrent_connections() {
        let listener = Listener::bind(
            loopback(),
            NotFoundHandler,
            SessionSettings::default(),
            MAX_CONNECTIONS,
        )
        .unwrap();
        let addr = listener.local_addr();
        tokio::spawn(listener.run());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            tasks.push(tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream
                    .write_all(b"GET / HTTP/1.0\r\n\r\n")
                    .await
                    .unwrap();
                let mut data = Vec::new();
                stream.read_to_end(&mut data).await.unwrap();
                data
            }));
        }

        for task in tasks {
            let data = task.await.unwrap();
            assert!(data.starts_with(b"HTTP/1.0 404 Not Found\r\n"));
            assert!(data.ends_with(b"Hello, world"));
        }
    }
}
