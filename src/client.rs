//! Simulated keep-alive client.
//!
//! Each `ClientLoop` resolves its target, opens one connection, and then
//! repeats the same pre-encoded request over it, reporting every completed
//! exchange to the shared `StatsCollector`. Reusing the connection and the
//! request keeps the measured cost at the connection's I/O.

use bytes::{Buf, BytesMut};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::endpoint::{self, Endpoint};
use crate::error::ClientError;
use crate::protocols::http::{ClientRequest, ParsedResponse, ResponseParser};
use crate::runtime::{with_timeout, ClientPhase};
use crate::stats::StatsCollector;

/// Initial capacity of the response buffer.
const BUFFER_SIZE: usize = 16 * 1024;

pub struct ClientLoop {
    id: usize,
    endpoint: Endpoint,
    request: ClientRequest,
    stats: Arc<StatsCollector>,
    timeout: Duration,
    buffer: BytesMut,
    phase: ClientPhase,
}

impl ClientLoop {
    pub fn new(
        id: usize,
        endpoint: Endpoint,
        path: &str,
        stats: Arc<StatsCollector>,
        timeout: Duration,
    ) -> Self {
        let request = ClientRequest::get(endpoint.host(), path);
        Self {
            id,
            endpoint,
            request,
            stats,
            timeout,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            phase: ClientPhase::Resolving,
        }
    }

    /// Run until the run's target has been fully claimed or an error occurs.
    /// Returns the number of exchanges this client completed.
    pub async fn run(mut self) -> Result<u64, ClientError> {
        let result = self.drive().await;
        if let Err(e) = &result {
            warn!(client = self.id, phase = %e.phase(), error = %e, "Client failed");
            self.phase = ClientPhase::Failed;
        }
        debug!(client = self.id, phase = %self.phase, "Client finished");
        result
    }

    async fn drive(&mut self) -> Result<u64, ClientError> {
        self.phase = ClientPhase::Resolving;
        let addrs = self
            .endpoint
            .resolve()
            .await
            .map_err(|source| ClientError::Resolve {
                target: self.endpoint.to_string(),
                source,
            })?;

        self.phase = ClientPhase::Connecting;
        let mut stream = endpoint::connect(&addrs, self.timeout)
            .await
            .map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        debug!(client = self.id, addr = ?stream.peer_addr().ok(), "Connected");

        let mut exchanges = 0u64;
        while self.stats.try_claim() {
            let response = match self.exchange(&mut stream).await {
                Ok(response) => response,
                Err(e) => {
                    self.stats.release();
                    return Err(e);
                }
            };
            self.stats.record(response.consumed as u64);
            exchanges += 1;

            if !response.keep_alive() {
                return Err(ClientError::Read(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "server closed the connection",
                )));
            }
        }

        debug!(client = self.id, exchanges, "Target claimed, client done");
        Ok(exchanges)
    }

    /// One write-then-read cycle.
    async fn exchange(&mut self, stream: &mut TcpStream) -> Result<ParsedResponse, ClientError> {
        self.phase = ClientPhase::Writing;
        with_timeout(self.timeout, stream.write_all(self.request.as_bytes()))
            .await
            .map_err(ClientError::Write)?;

        self.phase = ClientPhase::Reading;
        self.read_response(stream).await
    }

    async fn read_response(&mut self, stream: &mut TcpStream) -> Result<ParsedResponse, ClientError> {
        let mut parser = ResponseParser::default();
        loop {
            if let Some(response) = parser.parse(&self.buffer)? {
                self.buffer.advance(response.consumed);
                return Ok(response);
            }

            let n = with_timeout(self.timeout, stream.read_buf(&mut self.buffer))
                .await
                .map_err(ClientError::Read)?;
            if n == 0 {
                let response = parser
                    .finish(&self.buffer)
                    .ok_or_else(|| ClientError::Read(io::ErrorKind::UnexpectedEof.into()))?;
                self.buffer.clear();
                return Ok(response);
            }
        }
    }
}
