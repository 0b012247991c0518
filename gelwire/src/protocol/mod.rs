//! Gel Binary Protocol Messages
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the
//! message type, and the next four bytes specify the length of the rest of the message (this
//! length count includes itself, but not the message-type byte).
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ 5a ┃ 00 | 00 | 00 | 07 ┃  ..  ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! The client handshake is a regular message with its own type byte.
//!
//! Reads from the transport rarely line up with message boundaries, [`FrameDecoder`] buffers
//! partial frames until a whole one is available.
//!
//! <https://docs.geldata.com/reference/reference/protocol>

mod types;
mod error;
mod frame;
mod database_error;

pub mod frontend;
pub mod backend;

pub use types::{
    Capabilities, Cardinality, CompilationFlags, ErrorSeverity, IoFormat, LogSeverity,
    ProtocolVersion, TransactionState,
};
pub use error::ProtocolError;
pub use frame::{Frame, FrameDecoder};
pub use database_error::{DatabaseError, ErrorCode};

pub use frontend::FrontendProtocol;
pub use backend::{BackendProtocol, ServerMessage};
