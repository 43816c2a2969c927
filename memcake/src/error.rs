//! Error types for the memcake client.

use std::io;
use std::sync::Arc;

use memcake_proto::{ParseError, Status};

/// Result type for memcake operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a memcached server.
///
/// Status errors and timeouts affect a single command. Network and
/// protocol errors are terminal: every in-flight command on the
/// connection fails with the same error and the connection accepts no
/// further submissions (the pool replaces it on the next call).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The server answered with a non-zero status code.
    #[error("server status {code:#06x}: {message}")]
    Status {
        /// Raw status code from the response header.
        code: u16,
        /// Textual description from the response body.
        message: String,
    },

    /// No response arrived before the command's deadline.
    #[error("request timed out")]
    TimedOut,

    /// Socket read or write failed. Terminal for the connection.
    #[error("network failure: {0}")]
    Network(#[source] Arc<io::Error>),

    /// The server violated the wire protocol. Terminal for the connection.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ParseError),

    /// A response arrived for an opaque this connection never issued (and
    /// no command has expired). Terminal for the connection.
    #[error("response for unknown opaque {0:#010x}")]
    UnknownOpaque(u32),

    /// Submission to a connection that was explicitly closed.
    #[error("connection closed")]
    Closed,

    /// Every slot in the pool failed to connect.
    #[error("all connections failed")]
    AllConnectionsFailed,
}

impl Error {
    /// The known status for a [`Error::Status`], if the code is one
    /// memcached documents.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Status { code, .. } => Status::from_u16(*code),
            _ => None,
        }
    }

    /// Returns true if this error poisons the whole connection.
    ///
    /// Status errors and timeouts are per-command; everything else means
    /// the connection is done and must be replaced.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Protocol(_) | Error::UnknownOpaque(_) | Error::Closed
        )
    }

    pub(crate) fn from_io(err: io::Error) -> Self {
        Error::Network(Arc::new(err))
    }
}
