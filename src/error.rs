//! Error taxonomy for the benchmark harness.
//!
//! Connection-level errors (`SessionError`, `ClientError`) are local to the
//! owning session or client loop: they are logged and end that connection only.
//! `BindError` is fatal to the server role and is surfaced before any work
//! starts.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::runtime::ClientPhase;

/// Malformed or oversized HTTP message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed message head: {0}")]
    Head(String),

    #[error("too many headers")]
    TooManyHeaders,

    #[error("message head exceeds limit of {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("invalid content-length")]
    ContentLength,

    #[error("invalid chunked encoding")]
    Chunk,

    #[error("body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl From<httparse::Error> for ParseError {
    fn from(e: httparse::Error) -> Self {
        match e {
            httparse::Error::TooManyHeaders => ParseError::TooManyHeaders,
            other => ParseError::Head(other.to_string()),
        }
    }
}

/// Failure of one server-side session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("read: {0}")]
    Read(#[source] io::Error),

    #[error("write: {0}")]
    Write(#[source] io::Error),

    #[error("parse: {0}")]
    Parse(#[from] ParseError),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// Failure of one client loop, tagged with the phase that failed.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("connect: {0}")]
    Connect(#[source] io::Error),

    #[error("write: {0}")]
    Write(#[source] io::Error),

    #[error("read: {0}")]
    Read(#[source] io::Error),

    #[error("parse: {0}")]
    Parse(#[from] ParseError),
}

impl ClientError {
    /// Phase of the client state machine in which the error occurred.
    pub fn phase(&self) -> ClientPhase {
        match self {
            ClientError::Resolve { .. } => ClientPhase::Resolving,
            ClientError::Connect(_) => ClientPhase::Connecting,
            ClientError::Write(_) => ClientPhase::Writing,
            ClientError::Read(_) | ClientError::Parse(_) => ClientPhase::Reading,
        }
    }
}

/// Failure to set up the listening socket.
#[derive(Error, Debug)]
#[error("failed to {op} {addr}: {source}")]
pub struct BindError {
    pub op: &'static str,
    pub addr: SocketAddr,
    #[source]
    pub source: io::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_phase() {
        let err = ClientError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(err.phase(), ClientPhase::Connecting);

        let err = ClientError::Parse(ParseError::Chunk);
        assert_eq!(err.phase(), ClientPhase::Reading);
    }

    #[test]
    fn test_httparse_error_conversion() {
        assert_eq!(
            ParseError::from(httparse::Error::TooManyHeaders),
            ParseError::TooManyHeaders
        );
        assert!(matches!(
            ParseError::from(httparse::Error::Version),
            ParseError::Head(_)
        ));
    }
}
