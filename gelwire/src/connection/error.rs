use std::{fmt, io};

use crate::protocol::ProtocolVersion;

/// Failure to establish a connection.
///
/// Each kind carries explicit retry and reconnect flags so that a caller
/// managing connections can decide whether to try again.
pub struct ConnectionError {
    kind: ConnectionErrorKind,
}

/// All possible kind of [`ConnectionError`].
pub enum ConnectionErrorKind {
    /// Transport failure while connecting.
    Transient(io::Error),
    /// Connect did not complete within the configured timeout.
    Timeout,
    /// The server speaks an incompatible protocol version.
    UnsupportedVersion {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },
    /// Transient failures exhausted the configured attempts.
    Failed {
        attempts: u32,
        last: io::Error,
    },
    /// The connection is closed.
    Closed,
    /// TLS could not be configured.
    Tls(String),
}

impl ConnectionError {
    pub(crate) fn new(kind: ConnectionErrorKind) -> Self {
        Self { kind }
    }

    pub(crate) fn transient(err: io::Error) -> Self {
        Self::new(ConnectionErrorKind::Transient(err))
    }

    pub fn kind(&self) -> &ConnectionErrorKind {
        &self.kind
    }

    /// Whether a new attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::Transient(_) | ConnectionErrorKind::Closed)
    }

    /// Whether the connection must be replaced before retrying.
    pub fn reconnect_required(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::Transient(_) | ConnectionErrorKind::Closed)
    }
}

impl From<ConnectionErrorKind> for ConnectionError {
    fn from(kind: ConnectionErrorKind) -> Self {
        Self::new(kind)
    }
}

impl std::error::Error for ConnectionError { }

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConnectionErrorKind::Transient(e) => write!(f, "Failed to connect: {e}"),
            ConnectionErrorKind::Timeout => f.write_str("Connection timed out"),
            ConnectionErrorKind::UnsupportedVersion { client, server } => write!(
                f,
                "Server protocol version {server} is not supported, client speaks {client}"
            ),
            ConnectionErrorKind::Failed { attempts, last } => {
                write!(f, "Failed to connect after {attempts} attempt(s): {last}")
            }
            ConnectionErrorKind::Closed => f.write_str("Connection closed"),
            ConnectionErrorKind::Tls(e) => write!(f, "TLS configuration error: {e}"),
        }
    }
}

impl fmt::Debug for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
