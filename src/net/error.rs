//! Error types for the multiplexing listener.

use std::io;
use std::net::SocketAddr;

/// Errors raised by the mux listener and its protocol listeners.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Failed to bind the root socket.
    #[error("failed to bind: {0}")]
    Bind(#[source] io::Error),

    /// The root socket failed to accept a connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    /// No registered matcher claimed the connection.
    #[error("connection from {peer} matched no protocol")]
    NotMatched { peer: SocketAddr },

    /// The protocol listener has been closed and drained.
    #[error("listener closed")]
    ListenerClosed,
}

impl MuxError {
    /// Whether the accept loop may keep going after this error.
    ///
    /// A no-match only concerns the offending connection. Accept failures are
    /// temporary when they describe a single aborted handshake or resource
    /// exhaustion that may clear up (EMFILE / ENFILE).
    pub fn is_temporary(&self) -> bool {
        match self {
            MuxError::NotMatched { .. } => true,
            MuxError::Accept(e) => is_temporary_io(e),
            MuxError::Bind(_) | MuxError::ListenerClosed => false,
        }
    }
}

fn is_temporary_io(e: &io::Error) -> bool {
    // ENFILE / EMFILE
    if matches!(e.raw_os_error(), Some(23) | Some(24)) {
        return true;
    }
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_matched_is_temporary() {
        let err = MuxError::NotMatched {
            peer: "127.0.0.1:1".parse().unwrap(),
        };
        assert!(err.is_temporary());
        assert!(!MuxError::ListenerClosed.is_temporary());
    }

    #[test]
    fn accept_error_classification() {
        let aborted = MuxError::Accept(io::Error::from(io::ErrorKind::ConnectionAborted));
        assert!(aborted.is_temporary());

        let too_many_files = MuxError::Accept(io::Error::from_raw_os_error(24));
        assert!(too_many_files.is_temporary());

        let denied = MuxError::Accept(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_temporary());
    }
}
