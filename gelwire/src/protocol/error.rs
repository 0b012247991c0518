//! Protocol error
use std::fmt;

use super::ServerMessage;
use crate::binary::BinaryError;

/// An error when translating a frame from the server.
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Frame length field smaller than itself.
    InvalidLength(u32),
    /// Field holds a value outside of its enumeration.
    InvalidValue {
        field: &'static str,
        value: u64,
    },
    UnknownAuth(u32),
    /// `Data` message did not carry exactly one element.
    DataCount(u16),
    Malformed(BinaryError),
}

impl From<BinaryError> for ProtocolError {
    fn from(value: BinaryError) -> Self {
        Self::Malformed(value)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: None }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected { expect: Some(expect), found, phase: None }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: Some(phase) }
    }

    pub(crate) fn invalid(field: &'static str, value: impl Into<u64>) -> ProtocolError {
        Self::InvalidValue { field, value: value.into() }
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = ServerMessage::message_name(*found);
                match expect {
                    Some(m) => write!(
                        f,
                        "Expected message `{}` found `{found}`",
                        ServerMessage::message_name(*m),
                    )?,
                    None => write!(f, "Unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            }
            ProtocolError::InvalidLength(len) => write!(f, "Invalid frame length {len}"),
            ProtocolError::InvalidValue { field, value } => {
                write!(f, "Invalid {field} value 0x{value:x}")
            }
            ProtocolError::UnknownAuth(auth) => write!(f, "Unknown authentication status {auth}"),
            ProtocolError::DataCount(n) => {
                write!(f, "Expected one element in `Data`, found {n}")
            }
            ProtocolError::Malformed(e) => write!(f, "Malformed message: {e}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
