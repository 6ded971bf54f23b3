//! Protocol implementations.
//!
//! - `http`: HTTP/1.0 and HTTP/1.1 over a stream transport

pub mod http;
