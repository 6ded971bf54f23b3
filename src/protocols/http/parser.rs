//! Incremental HTTP/1.x parsers built on `httparse`.
//!
//! A parser is a per-message value: construct a fresh one for every message.
//! `parse` is called with the unconsumed front of the connection buffer each
//! time more bytes arrive; it caches the parsed head and the chunked decoding
//! position, so later calls only look at bytes they have not seen yet.
//!
//! Heads (and chunked trailers) are bounded by a head limit and bodies by a
//! body limit, so a peer cannot make the connection buffer grow without end.

use bytes::{Bytes, BytesMut};

use super::message::{find_header, has_token, Header, ParsedResponse, Request, Version};
use crate::error::ParseError;

/// Maximum number of headers accepted in one message.
pub const MAX_HEADERS: usize = 64;

/// Default cap on a message head (request/status line plus headers), in bytes.
pub const HEAD_LIMIT: usize = 8 * 1024;

/// Default cap on request bodies, in bytes.
pub const BODY_LIMIT: usize = 10_000;

/// Cap on response bodies the client will buffer.
pub const RESPONSE_BODY_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(usize),
    Chunked,
    /// Body runs until the peer closes the connection (responses only).
    UntilEof,
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    version: Version,
    headers: Vec<Header>,
    len: usize,
    framing: Framing,
}

/// Parser for one inbound request.
#[derive(Debug)]
pub struct RequestParser {
    head_limit: usize,
    body_limit: usize,
    head: Option<RequestHead>,
    chunked: ChunkedBody,
}

impl RequestParser {
    pub fn new(head_limit: usize, body_limit: usize) -> Self {
        Self {
            head_limit,
            body_limit,
            head: None,
            chunked: ChunkedBody::default(),
        }
    }

    /// Try to parse one complete request from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the request
    /// and the number of bytes it occupied.
    pub fn parse(&mut self, buf: &[u8]) -> Result<Option<(Request, usize)>, ParseError> {
        let head = match self.head.take() {
            Some(head) => head,
            None => match parse_request_head(buf, self.head_limit, self.body_limit)? {
                Some(head) => head,
                None => return Ok(None),
            },
        };

        let limits = Limits {
            head: self.head_limit,
            body: self.body_limit,
        };
        match read_body(&buf[head.len..], head.framing, limits, &mut self.chunked)? {
            Some((body, body_len)) => {
                let consumed = head.len + body_len;
                let request = Request {
                    method: head.method,
                    target: head.target,
                    version: head.version,
                    headers: head.headers,
                    body,
                };
                Ok(Some((request, consumed)))
            }
            None => {
                self.head = Some(head);
                Ok(None)
            }
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(HEAD_LIMIT, BODY_LIMIT)
    }
}

fn parse_request_head(
    buf: &[u8],
    head_limit: usize,
    body_limit: usize,
) -> Result<Option<RequestHead>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => 0,
    };
    check_head_len(len, buf.len(), head_limit)?;
    if len == 0 {
        return Ok(None);
    }

    let headers = owned_headers(req.headers);
    let framing = match framing(&headers)? {
        // No framing on a request means no body.
        Framing::UntilEof => Framing::Empty,
        other => other,
    };
    if let Framing::Length(n) = framing {
        if n > body_limit {
            return Err(ParseError::BodyTooLarge { limit: body_limit });
        }
    }

    Ok(Some(RequestHead {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        version: Version::from_minor(req.version.unwrap_or(1)),
        headers,
        len,
        framing,
    }))
}

#[derive(Debug)]
struct ResponseHead {
    status: u16,
    version: Version,
    headers: Vec<Header>,
    len: usize,
    framing: Framing,
}

/// Parser for one response read by a client.
#[derive(Debug)]
pub struct ResponseParser {
    head_limit: usize,
    body_limit: usize,
    head: Option<ResponseHead>,
    chunked: ChunkedBody,
}

impl ResponseParser {
    pub fn new(head_limit: usize, body_limit: usize) -> Self {
        Self {
            head_limit,
            body_limit,
            head: None,
            chunked: ChunkedBody::default(),
        }
    }

    /// Try to parse one complete response from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> Result<Option<ParsedResponse>, ParseError> {
        let head = match self.head.take() {
            Some(head) => head,
            None => match parse_response_head(buf, self.head_limit)? {
                Some(head) => head,
                None => return Ok(None),
            },
        };

        if head.framing == Framing::UntilEof {
            let available = buf.len() - head.len;
            if available > self.body_limit {
                return Err(ParseError::BodyTooLarge {
                    limit: self.body_limit,
                });
            }
            self.head = Some(head);
            return Ok(None);
        }

        let limits = Limits {
            head: self.head_limit,
            body: self.body_limit,
        };
        match read_body(&buf[head.len..], head.framing, limits, &mut self.chunked)? {
            Some((body, body_len)) => Ok(Some(ParsedResponse {
                status: head.status,
                version: head.version,
                headers: head.headers,
                body,
                consumed: head.len + body_len,
            })),
            None => {
                self.head = Some(head);
                Ok(None)
            }
        }
    }

    /// Complete the message at end-of-stream.
    ///
    /// Only a response whose body is delimited by connection close can be
    /// completed here; anything else is truncated and yields `None`.
    pub fn finish(&mut self, buf: &[u8]) -> Option<ParsedResponse> {
        let head = self.head.take()?;
        if head.framing != Framing::UntilEof {
            return None;
        }
        Some(ParsedResponse {
            status: head.status,
            version: head.version,
            headers: head.headers,
            body: Bytes::copy_from_slice(&buf[head.len..]),
            consumed: buf.len(),
        })
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(HEAD_LIMIT, RESPONSE_BODY_LIMIT)
    }
}

fn parse_response_head(
    buf: &[u8],
    head_limit: usize,
) -> Result<Option<ResponseHead>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    let len = match resp.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => 0,
    };
    check_head_len(len, buf.len(), head_limit)?;
    if len == 0 {
        return Ok(None);
    }

    let status = resp.code.unwrap_or_default();
    let headers = owned_headers(resp.headers);
    let framing = if (100..200).contains(&status) || status == 204 || status == 304 {
        Framing::Empty
    } else {
        framing(&headers)?
    };

    Ok(Some(ResponseHead {
        status,
        version: Version::from_minor(resp.version.unwrap_or(1)),
        headers,
        len,
        framing,
    }))
}

/// `len` is the parsed head length, or 0 while the head is still partial,
/// in which case everything buffered so far belongs to the head.
fn check_head_len(len: usize, buffered: usize, limit: usize) -> Result<(), ParseError> {
    let seen = if len == 0 { buffered } else { len };
    if seen > limit {
        return Err(ParseError::HeadTooLarge { limit });
    }
    Ok(())
}

fn owned_headers(headers: &[httparse::Header<'_>]) -> Vec<Header> {
    headers
        .iter()
        .map(|h| Header {
            name: h.name.to_string(),
            value: Bytes::copy_from_slice(h.value),
        })
        .collect()
}

/// Body framing from `Transfer-Encoding` / `Content-Length`.
fn framing(headers: &[Header]) -> Result<Framing, ParseError> {
    let chunked = match find_header(headers, "transfer-encoding") {
        Some(te) => {
            let last = te.rsplit(',').next().unwrap_or_default();
            if !has_token(last, "chunked") {
                return Err(ParseError::Head(format!("unsupported transfer-encoding: {te}")));
            }
            true
        }
        None => false,
    };

    let mut length: Option<usize> = None;
    for h in headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case("content-length"))
    {
        let value = std::str::from_utf8(&h.value)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or(ParseError::ContentLength)?;
        match length {
            Some(prev) if prev != value => return Err(ParseError::ContentLength),
            _ => length = Some(value),
        }
    }

    match (chunked, length) {
        (true, Some(_)) => Err(ParseError::ContentLength),
        (true, None) => Ok(Framing::Chunked),
        (false, Some(0)) => Ok(Framing::Empty),
        (false, Some(n)) => Ok(Framing::Length(n)),
        (false, None) => Ok(Framing::UntilEof),
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    head: usize,
    body: usize,
}

fn read_body(
    buf: &[u8],
    framing: Framing,
    limits: Limits,
    chunked: &mut ChunkedBody,
) -> Result<Option<(Bytes, usize)>, ParseError> {
    match framing {
        Framing::Empty => Ok(Some((Bytes::new(), 0))),
        Framing::Length(n) => {
            if buf.len() < n {
                Ok(None)
            } else {
                Ok(Some((Bytes::copy_from_slice(&buf[..n]), n)))
            }
        }
        Framing::Chunked => chunked.decode(buf, limits),
        Framing::UntilEof => Ok(None),
    }
}

/// Resumable decoder for a chunked body (including trailers).
///
/// `pos` only moves past complete units (a size line, a chunk with its CRLF,
/// a trailer line), so each call picks up where the previous one stopped.
#[derive(Debug, Default)]
struct ChunkedBody {
    /// Offset of the first unparsed byte, relative to the start of the body.
    pos: usize,
    body: BytesMut,
    /// Offset where the trailer section starts, once the last chunk is seen.
    trailers: Option<usize>,
}

impl ChunkedBody {
    /// Returns the body and the number of bytes it occupied once the
    /// terminating empty line has arrived.
    fn decode(
        &mut self,
        buf: &[u8],
        limits: Limits,
    ) -> Result<Option<(Bytes, usize)>, ParseError> {
        while self.trailers.is_none() {
            let rest = &buf[self.pos..];
            let (size_len, size) = match httparse::parse_chunk_size(rest) {
                Ok(httparse::Status::Complete(v)) => v,
                // An endless size line (e.g. padded extensions) is malformed.
                Ok(httparse::Status::Partial) if rest.len() > limits.head => {
                    return Err(ParseError::Chunk)
                }
                Ok(httparse::Status::Partial) => return Ok(None),
                Err(_) => return Err(ParseError::Chunk),
            };
            if size == 0 {
                self.pos += size_len;
                self.trailers = Some(self.pos);
                break;
            }

            let size = usize::try_from(size)
                .ok()
                .filter(|&size| size <= limits.body - self.body.len())
                .ok_or(ParseError::BodyTooLarge { limit: limits.body })?;
            let data = self.pos + size_len;
            if buf.len() < data + size + 2 {
                return Ok(None);
            }
            if &buf[data + size..data + size + 2] != b"\r\n" {
                return Err(ParseError::Chunk);
            }
            self.body.extend_from_slice(&buf[data..data + size]);
            self.pos = data + size + 2;
        }

        // Trailer section ends with an empty line and counts against the
        // head limit.
        let start = self.trailers.unwrap_or(self.pos);
        loop {
            match find_crlf(&buf[self.pos..]) {
                None if buf.len() - start > limits.head => {
                    return Err(ParseError::HeadTooLarge { limit: limits.head })
                }
                None => return Ok(None),
                Some(0) => {
                    self.pos += 2;
                    let body = std::mem::take(&mut self.body).freeze();
                    return Ok(Some((body, self.pos)));
                }
                Some(i) => {
                    self.pos += i + 2;
                    if self.pos - start > limits.head {
                        return Err(ParseError::HeadTooLarge { limit: limits.head });
                    }
                }
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
