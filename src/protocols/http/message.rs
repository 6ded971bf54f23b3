//! HTTP/1.x message types and encoding.

use bytes::{BufMut, Bytes, BytesMut};

/// Value of the `Server` and `User-Agent` headers.
pub const AGENT: &str = concat!("beast-bench/", env!("CARGO_PKG_VERSION"));

/// Protocol version of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Map httparse's minor version number.
    pub fn from_minor(minor: u8) -> Self {
        if minor == 0 {
            Version::Http10
        } else {
            Version::Http11
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Bytes,
}

/// First value of header `name` (case-insensitive), if it is valid UTF-8.
pub(crate) fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(&h.value).ok())
}

/// Whether a comma-separated header value contains `token`.
pub(crate) fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Keep-alive semantics: on by default for 1.1 unless `Connection: close`,
/// off by default for 1.0 unless `Connection: keep-alive`.
pub(crate) fn keep_alive(version: Version, headers: &[Header]) -> bool {
    let connection = find_header(headers, "connection");
    match version {
        Version::Http11 => !connection.is_some_and(|v| has_token(v, "close")),
        Version::Http10 => connection.is_some_and(|v| has_token(v, "keep-alive")),
    }
}

/// A parsed inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: Version,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn keep_alive(&self) -> bool {
        keep_alive(self.version, &self.headers)
    }

    /// True when the client asks to switch to another protocol
    /// (e.g. a WebSocket handshake).
    pub fn is_upgrade(&self) -> bool {
        let wants_upgrade = self
            .header("connection")
            .is_some_and(|v| has_token(v, "upgrade"));
        let protocol = self.header("upgrade").is_some_and(|v| !v.trim().is_empty());
        wants_upgrade && protocol
    }
}

/// An outbound response produced by a handler.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub version: Version,
    pub content_type: &'static str,
    pub body: Bytes,
    pub keep_alive: bool,
}

impl Response {
    pub fn new(status: u16, version: Version) -> Self {
        Self {
            status,
            version,
            content_type: "text/plain",
            body: Bytes::new(),
            keep_alive: version == Version::Http11,
        }
    }

    pub fn content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Whether the connection must be closed after this response is sent.
    pub fn need_eof(&self) -> bool {
        !self.keep_alive
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128 + self.body.len());
        buf.put_slice(self.version.as_str().as_bytes());
        buf.put_slice(format!(" {} {}\r\n", self.status, reason(self.status)).as_bytes());
        buf.put_slice(format!("Server: {AGENT}\r\n").as_bytes());
        buf.put_slice(format!("Content-Type: {}\r\n", self.content_type).as_bytes());
        buf.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        if self.keep_alive {
            buf.put_slice(b"Connection: keep-alive\r\n");
        } else {
            buf.put_slice(b"Connection: close\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// The request a client sends on every iteration, encoded once.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    encoded: Bytes,
}

impl ClientRequest {
    /// `GET <path> HTTP/1.1` with `Host` and `User-Agent`.
    pub fn get(host: &str, path: &str) -> Self {
        let encoded = format!(
            "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {AGENT}\r\n\r\n"
        );
        Self {
            encoded: Bytes::from(encoded),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }
}

/// A response as parsed by the client.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status: u16,
    pub version: Version,
    pub headers: Vec<Header>,
    pub body: Bytes,
    /// Bytes of the whole message (head + body) taken from the stream.
    pub consumed: usize,
}

impl ParsedResponse {
    pub fn keep_alive(&self) -> bool {
        keep_alive(self.version, &self.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: Bytes::copy_from_slice(value.as_bytes()),
        }
    }

    fn request(version: Version, headers: Vec<Header>) -> Request {
        Request {
            method: "GET".into(),
            target: "/".into(),
            version,
            headers,
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_keep_alive_defaults() {
        assert!(request(Version::Http11, vec![]).keep_alive());
        assert!(!request(Version::Http10, vec![]).keep_alive());
        assert!(!request(Version::Http11, vec![header("Connection", "close")]).keep_alive());
        assert!(request(Version::Http10, vec![header("connection", "Keep-Alive")]).keep_alive());
    }

    #[test]
    fn test_upgrade_detection() {
        let req = request(
            Version::Http11,
            vec![
                header("Connection", "keep-alive, Upgrade"),
                header("Upgrade", "websocket"),
            ],
        );
        assert!(req.is_upgrade());

        let req = request(Version::Http11, vec![header("Upgrade", "websocket")]);
        assert!(!req.is_upgrade());
    }

    #[test]
    fn test_response_encode() {
        let resp = Response::new(404, Version::Http11)
            .content_type("text/html")
            .body("Hello, world")
            .keep_alive(true);
        let encoded = resp.encode();
        let text = std::str::from_utf8(&encoded).unwrap();

        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\nHello, world"));
        assert!(!resp.need_eof());
    }

    #[test]
    fn test_response_close() {
        let resp = Response::new(404, Version::Http10);
        assert!(resp.need_eof());
        let encoded = resp.encode();
        assert!(encoded.starts_with(b"HTTP/1.0 404 Not Found\r\n"));
    }

    #[test]
    fn test_client_request() {
        let req = ClientRequest::get("example.com", "/index.html");
        assert_eq!(
            req.as_bytes(),
            format!("GET /index.html HTTP/1.1\r\nHost: example.com\r\nUser-Agent: {AGENT}\r\n\r\n")
                .as_bytes()
        );
    }
}
