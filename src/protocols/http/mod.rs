//! HTTP/1.x support for the benchmark server and clients.
//!
//! Only what the harness needs:
//! - `parser`: incremental request/response parsing (`httparse` underneath)
//!   with `Content-Length` and chunked bodies, bounded heads and bodies
//! - `message`: request/response types, keep-alive rules, encoding
//! - `handler`: the request-to-response seam; the default answers every
//!   request with a fixed page
//! - `upgrade`: where upgrade requests are handed off
//!
//! No routing, no general request handling.

pub mod handler;
pub mod message;
pub mod parser;
pub mod upgrade;

pub use handler::{Handler, NotFoundHandler};
pub use message::{ClientRequest, ParsedResponse, Request, Response, Version};
pub use parser::{RequestParser, ResponseParser, BODY_LIMIT, HEAD_LIMIT};
