//! Server side of one accepted connection.
//!
//! A session runs as a single task, so its reads and writes never execute
//! concurrently with each other. Inside that task one read and one write may
//! be outstanding at the same time: the client can keep pipelining requests
//! while earlier responses drain, until the work queue reaches its limit.
//!
//! ```text
//! Reading --parse--> dispatch --enqueue--> Reading
//!    |                   |
//!    |                   +-- queue full ----------> Backpressured --write done--> Reading
//!    |                   +-- close-after-write ---> Draining --write done--> Closed
//!    +-- EOF / parse error / timeout -------------> Closed
//! ```

use bytes::{Buf, BytesMut};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::error::SessionError;
use crate::protocols::http::{upgrade, Handler, Request, RequestParser, BODY_LIMIT, HEAD_LIMIT};
use crate::runtime::{Completion, SessionState, WorkItem, WorkQueue, QUEUE_LIMIT};

/// Minimum spare capacity kept in the read buffer.
const READ_RESERVE: usize = 16 * 1024;

/// Idle limit for every read and write.
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-session limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub head_limit: usize,
    pub body_limit: usize,
    pub queue_limit: usize,
    pub timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            head_limit: HEAD_LIMIT,
            body_limit: BODY_LIMIT,
            queue_limit: QUEUE_LIMIT,
            timeout: IO_TIMEOUT,
        }
    }
}

pub struct ServerSession<S, H> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    /// Unparsed bytes; each parsed message is split off the front.
    buffer: BytesMut,
    parser: RequestParser,
    queue: WorkQueue<WorkItem>,
    state: SessionState,
    handler: Arc<H>,
    settings: SessionSettings,
    read_deadline: Instant,
    write_deadline: Instant,
}

impl<S, H> ServerSession<S, H>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    H: Handler,
{
    pub fn new(stream: S, handler: Arc<H>, settings: SessionSettings) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let now = Instant::now();
        Self {
            reader,
            writer,
            buffer: BytesMut::with_capacity(READ_RESERVE),
            parser: RequestParser::new(settings.head_limit, settings.body_limit),
            queue: WorkQueue::new(settings.queue_limit),
            state: SessionState::Reading,
            handler,
            settings,
            read_deadline: now + settings.timeout,
            write_deadline: now + settings.timeout,
        }
    }

    /// Serve the connection until it closes or is handed off.
    pub async fn run(mut self) {
        match self.drive().await {
            Ok(Some(request)) => {
                let stream = self.reader.unsplit(self.writer);
                upgrade::hand_off(stream, request);
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Session failed"),
        }
        self.close().await;
    }

    /// Event loop of the session. Returns the request to hand off when the
    /// client asked for a protocol upgrade.
    async fn drive(&mut self) -> Result<Option<Request>, SessionError> {
        loop {
            if let Some(request) = self.dispatch_buffered()? {
                return Ok(Some(request));
            }

            let reading = self.state.can_read();
            let writing = !self.queue.is_empty();
            if self.state.is_closed() || (!reading && !writing) {
                return Ok(None);
            }

            let (deadline, phase) = match (reading, writing) {
                (true, true) if self.write_deadline < self.read_deadline => {
                    (self.write_deadline, "write")
                }
                (true, _) => (self.read_deadline, "read"),
                _ => (self.write_deadline, "write"),
            };

            if reading && self.buffer.capacity() - self.buffer.len() < READ_RESERVE {
                self.buffer.reserve(READ_RESERVE);
            }

            tokio::select! {
                result = self.reader.read_buf(&mut self.buffer), if reading => {
                    let n = result.map_err(SessionError::Read)?;
                    if n == 0 {
                        trace!(unparsed = self.buffer.len(), "End of stream");
                        self.state = SessionState::Closed;
                        return Ok(None);
                    }
                    self.read_deadline = Instant::now() + self.settings.timeout;
                }
                result = write_front(&mut self.writer, &self.queue), if writing => {
                    let n = result.map_err(SessionError::Write)?;
                    self.on_written(n).await?;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(SessionError::Timeout(phase));
                }
            }
        }
    }

    /// Parse and dispatch every complete request already buffered, stopping
    /// when more bytes are needed or reading has to pause.
    fn dispatch_buffered(&mut self) -> Result<Option<Request>, SessionError> {
        while self.state.can_read() {
            let Some((request, consumed)) = self.parser.parse(&self.buffer)? else {
                break;
            };
            self.buffer.advance(consumed);
            self.parser = RequestParser::new(self.settings.head_limit, self.settings.body_limit);

            if request.is_upgrade() {
                return Ok(Some(request));
            }
            self.dispatch(&request);
        }
        Ok(None)
    }

    fn dispatch(&mut self, request: &Request) {
        let response = self.handler.handle(request);
        let completion = if response.need_eof() {
            Completion::Close
        } else {
            Completion::KeepAlive
        };

        trace!(
            method = %request.method,
            target = %request.target,
            status = response.status,
            queued = self.queue.len(),
            "Dispatching request"
        );

        let item = WorkItem::new(response.encode(), completion);
        if self.queue.enqueue(item) {
            self.write_deadline = Instant::now() + self.settings.timeout;
        }

        if completion == Completion::Close {
            self.state = SessionState::Draining;
        } else if self.queue.is_full() {
            trace!(limit = self.queue.limit(), "Work queue full, pausing reads");
            self.state = SessionState::Backpressured;
        }
    }

    async fn on_written(&mut self, n: usize) -> Result<(), SessionError> {
        if n == 0 {
            return Err(SessionError::Write(io::ErrorKind::WriteZero.into()));
        }
        let Some(item) = self.queue.front_mut() else {
            return Ok(());
        };
        self.write_deadline = Instant::now() + self.settings.timeout;
        if !item.advance(n) {
            return Ok(());
        }

        let completion = item.completion();
        let len = item.len();
        self.writer.flush().await.map_err(SessionError::Write)?;
        trace!(bytes = len, "Response written");

        let was_full = self.queue.on_write_complete();
        if completion == Completion::Close {
            self.state = SessionState::Closed;
            return Ok(());
        }

        if was_full && self.state == SessionState::Backpressured {
            trace!("Work queue below limit, resuming reads");
            self.state = SessionState::Reading;
            self.read_deadline = Instant::now() + self.settings.timeout;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.state = SessionState::Closed;
        let discarded = self.queue.clear();
        if discarded > 0 {
            trace!(discarded, "Discarding queued responses");
        }
        // Half-close: the peer sees end-of-stream, reads stay possible.
        if let Err(e) = self.writer.shutdown().await {
            trace!(error = %e, "Shutdown failed");
        }
    }
}

/// Write as much of the front item as the transport accepts.
async fn write_front<W>(writer: &mut W, queue: &WorkQueue<WorkItem>) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    match queue.front() {
        Some(item) => writer.write(item.remaining()).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::http::{NotFoundHandler, ParsedResponse, Response, ResponseParser};
    use tokio::io::DuplexStream;

    fn echo_path(req: &Request) -> Response {
        Response::new(200, req.version)
            .body(req.target.clone())
            .keep_alive(req.keep_alive())
    }

    fn spawn_session<H: Handler>(handler: H, settings: SessionSettings) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = ServerSession::new(server, Arc::new(handler), settings);
        tokio::spawn(session.run());
        client
    }

    fn parse_all(mut data: &[u8]) -> Vec<ParsedResponse> {
        let mut out = Vec::new();
        while !data.is_empty() {
            let resp = ResponseParser::default()
                .parse(data)
                .unwrap()
                .expect("truncated response");
            data = &data[resp.consumed..];
            out.push(resp);
        }
        out
    }

    async fn read_to_end(stream: &mut DuplexStream) -> Vec<u8> {
        let mut data = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut data))
            .await
            .expect("session did not close")
            .unwrap();
        data
    }

    async fn read_responses<R>(stream: &mut R, n: usize) -> Vec<ParsedResponse>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        while out.len() < n {
            if let Some(resp) = ResponseParser::default().parse(&buf).unwrap() {
                buf.advance(resp.consumed);
                out.push(resp);
                continue;
            }
            let read = stream.read_buf(&mut buf).await.unwrap();
            assert!(read > 0, "unexpected end of stream");
        }
        out
    }

    fn get(path: &str) -> String {
        format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n")
    }

    #[tokio::test]
    async fn test_single_exchange_on_mock_stream() {
        let request = get("/");
        let expected = Response::new(404, crate::protocols::http::Version::Http11)
            .content_type("text/html")
            .body("Hello, world")
            .keep_alive(true)
            .encode();

        let mock = tokio_test::io::Builder::new()
            .read(request.as_bytes())
            .write(&expected)
            .build();

        ServerSession::new(mock, Arc::new(NotFoundHandler), SessionSettings::default())
            .run()
            .await;
    }

    #[tokio::test]
    async fn test_pipelined_responses_in_order() {
        let mut client = spawn_session(echo_path, SessionSettings::default());

        let batch: String = (0..50).map(|i| get(&format!("/{i}"))).collect();
        client.write_all(batch.as_bytes()).await.unwrap();

        let responses = read_responses(&mut client, 50).await;
        for (i, resp) in responses.iter().enumerate() {
            assert_eq!(resp.body, format!("/{i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn test_backpressure_resumes_reading() {
        let settings = SessionSettings {
            queue_limit: 1,
            ..SessionSettings::default()
        };
        let mut client = spawn_session(echo_path, settings);

        let batch: String = (0..20).map(|i| get(&format!("/{i}"))).collect();
        client.write_all(batch.as_bytes()).await.unwrap();

        let responses = read_responses(&mut client, 20).await;
        let bodies: Vec<_> = responses.iter().map(|r| r.body.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("/{i}")).collect();
        assert_eq!(bodies, expected);
    }

    #[tokio::test]
    async fn test_full_queue_stops_parsing_until_write_completes() {
        let (_client, server) = tokio::io::duplex(64 * 1024);
        let settings = SessionSettings {
            queue_limit: 2,
            ..SessionSettings::default()
        };
        let mut session = ServerSession::new(server, Arc::new(echo_path), settings);
        let batch: String = (0..5).map(|i| get(&format!("/{i}"))).collect();
        session.buffer.extend_from_slice(batch.as_bytes());

        session.dispatch_buffered().unwrap();
        assert_eq!(session.queue.len(), 2);
        assert_eq!(session.state, SessionState::Backpressured);
        let pending = session.buffer.len();
        assert_eq!(pending, 3 * get("/0").len());

        // Nothing more is taken while the queue is full.
        session.dispatch_buffered().unwrap();
        assert_eq!(session.queue.len(), 2);
        assert_eq!(session.buffer.len(), pending);

        // A partial write does not free a slot.
        session.on_written(1).await.unwrap();
        assert_eq!(session.state, SessionState::Backpressured);

        let rest = session.queue.front().unwrap().remaining().len();
        session.on_written(rest).await.unwrap();
        assert_eq!(session.state, SessionState::Reading);
        assert_eq!(session.queue.len(), 1);

        session.dispatch_buffered().unwrap();
        assert_eq!(session.queue.len(), 2);
        assert_eq!(session.state, SessionState::Backpressured);
    }

    #[tokio::test]
    async fn test_stalled_writes_stop_reads() {
        let settings = SessionSettings {
            queue_limit: 1,
            ..SessionSettings::default()
        };
        // A tiny pipe: one response does not fit, so the first write stalls
        // until the client reads.
        let (client, server) = tokio::io::duplex(64);
        tokio::spawn(ServerSession::new(server, Arc::new(echo_path), settings).run());
        let (mut rx, mut tx) = tokio::io::split(client);

        let batch: String = (0..100).map(|i| get(&format!("/{i}"))).collect();
        let mut send = Box::pin(tx.write_all(batch.as_bytes()));

        // The session stops reading once its queue is full, so the request
        // stream backs up behind it.
        let stalled = tokio::time::timeout(Duration::from_millis(100), &mut send).await;
        assert!(stalled.is_err());

        let reader = tokio::spawn(async move { read_responses(&mut rx, 100).await });
        send.await.unwrap();

        let responses = reader.await.unwrap();
        for (i, resp) in responses.iter().enumerate() {
            assert_eq!(resp.body, format!("/{i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn test_close_response_discards_rest() {
        let mut client = spawn_session(echo_path, SessionSettings::default());

        let batch = format!(
            "{}GET /b HTTP/1.1\r\nConnection: close\r\n\r\n{}",
            get("/a"),
            get("/c")
        );
        client.write_all(batch.as_bytes()).await.unwrap();

        let responses = parse_all(&read_to_end(&mut client).await);
        assert_eq!(responses.len(), 2);
        assert_eq!(&responses[0].body[..], b"/a");
        assert_eq!(&responses[1].body[..], b"/b");
        assert!(!responses[1].keep_alive());
    }

    #[tokio::test]
    async fn test_http10_closes_after_response() {
        let mut client = spawn_session(NotFoundHandler, SessionSettings::default());
        client
            .write_all(b"GET / HTTP/1.0\r\n\r\n")
            .await
            .unwrap();

        let responses = parse_all(&read_to_end(&mut client).await);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, 404);
    }

    #[tokio::test]
    async fn test_oversized_body_closes_without_response() {
        let mut client = spawn_session(NotFoundHandler, SessionSettings::default());
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10001\r\n\r\n")
            .await
            .unwrap();

        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_head_closes_without_response() {
        let mut client = spawn_session(NotFoundHandler, SessionSettings::default());
        let mut request = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        request.resize(4 * HEAD_LIMIT, b'a');
        // The session may hang up before taking everything.
        let _ = client.write_all(&request).await;

        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_closes_without_response() {
        let mut client = spawn_session(NotFoundHandler, SessionSettings::default());
        client.write_all(b"\x01\x02 garbage\r\n\r\n").await.unwrap();

        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_end_of_stream_closes() {
        let mut client = spawn_session(NotFoundHandler, SessionSettings::default());
        client.shutdown().await.unwrap();

        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_idle_timeout_closes() {
        let settings = SessionSettings {
            timeout: Duration::from_millis(50),
            ..SessionSettings::default()
        };
        let mut client = spawn_session(NotFoundHandler, settings);

        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_hands_off_connection() {
        let mut client = spawn_session(NotFoundHandler, SessionSettings::default());
        client
            .write_all(
                b"GET /ws HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
            )
            .await
            .unwrap();

        assert!(read_to_end(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let mut client = spawn_session(echo_path, SessionSettings::default());
        let request = get("/split");
        let (head, tail) = request.as_bytes().split_at(7);

        client.write_all(head).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(tail).await.unwrap();

        let responses = read_responses(&mut client, 1).await;
        assert_eq!(&responses[0].body[..], b"/split");
    }
}
