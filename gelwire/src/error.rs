//! `gelwire` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    binary::BinaryError,
    codec::CodecError,
    connection::{ConfigError, ConnectionError},
    protocol::{DatabaseError, ProtocolError},
    scram::ScramError,
    transaction::TransactionError,
};

/// A specialized [`Result`] type for `gelwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `gelwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Add context describing the failed operation.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Whether the failed operation may succeed when run again.
    ///
    /// Only server errors and transient connection failures are flagged,
    /// everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::Database(e) => e.is_retryable(),
            ErrorKind::Connection(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the connection must be replaced before running again.
    pub fn reconnect_required(&self) -> bool {
        match &self.kind {
            ErrorKind::Database(e) => e.reconnect_required(),
            ErrorKind::Connection(e) => e.reconnect_required(),
            _ => false,
        }
    }

    /// The server error, if this is one.
    pub fn as_database_error(&self) -> Option<&DatabaseError> {
        match &self.kind {
            ErrorKind::Database(e) => Some(e),
            _ => None,
        }
    }
}

/// All possible error kind from `gelwire` library.
pub enum ErrorKind {
    Config(ConfigError),
    Binary(BinaryError),
    Codec(CodecError),
    Protocol(ProtocolError),
    Io(io::Error),
    Database(DatabaseError),
    Scram(ScramError),
    Connection(ConnectionError),
    Transaction(TransactionError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<BinaryError>e => ErrorKind::Binary(e));
from!(<CodecError>e => ErrorKind::Codec(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<DatabaseError>e => ErrorKind::Database(e));
from!(<ScramError>e => ErrorKind::Scram(e));
from!(<ConnectionError>e => ErrorKind::Connection(e));
from!(<TransactionError>e => ErrorKind::Transaction(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Binary(e) => e.fmt(f),
            Self::Codec(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Scram(e) => e.fmt(f),
            Self::Connection(e) => e.fmt(f),
            Self::Transaction(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
