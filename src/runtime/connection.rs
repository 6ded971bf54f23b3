//! Connection state machines for server sessions and client loops.
//!
//! A server session's write side is implied by its work queue (non-empty
//! means a write is in flight); `SessionState` tracks the read side.

use std::fmt;

/// Read-side state of a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Parsing the next request, reading more bytes when the buffer runs dry.
    Reading,
    /// Reads suspended because the work queue is at its limit.
    /// Resumes when a write completes and the queue drops below the limit.
    Backpressured,
    /// A close-after-write response is queued; no further requests are read.
    Draining,
    /// Terminal. Outbound side shut down, queued work discarded.
    Closed,
}

impl SessionState {
    /// Whether the session may issue a read in this state.
    pub fn can_read(self) -> bool {
        matches!(self, SessionState::Reading)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Phase of a client loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Resolving,
    Connecting,
    Writing,
    Reading,
    /// Terminal. The client stops contributing load.
    Failed,
}

impl fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientPhase::Resolving => "resolve",
            ClientPhase::Connecting => "connect",
            ClientPhase::Writing => "write",
            ClientPhase::Reading => "read",
            ClientPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_reading_state_reads() {
        assert!(SessionState::Reading.can_read());
        assert!(!SessionState::Backpressured.can_read());
        assert!(!SessionState::Draining.can_read());
        assert!(!SessionState::Closed.can_read());
        assert!(SessionState::Closed.is_closed());
    }

    #[test]
    fn test_client_phase_display() {
        assert_eq!(ClientPhase::Resolving.to_string(), "resolve");
        assert_eq!(ClientPhase::Reading.to_string(), "read");
    }
}
