//! Client messages
use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::{Capabilities, Cardinality, CompilationFlags, IoFormat, ProtocolVersion};
use crate::ext::{BufMutExt, StrExt};

/// Write a client message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size_hint = msg.size_hint();
    buf.reserve(PREFIX + size_hint as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_u32(4 + size_hint);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size_hint as usize,
        "Client message body size not equal to size hint"
    );
}

/// A type which can be encoded into a client message.
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Size of the main body, excluding the type and length.
    fn size_hint(&self) -> u32;

    /// Write the main body of the message.
    ///
    /// The length of body written must be equal to the
    /// length returned by [`size_hint`][FrontendProtocol::size_hint].
    fn encode(self, buf: impl BufMut);
}

/// First message of a connection.
#[derive(Debug)]
pub struct ClientHandshake<'a> {
    pub version: ProtocolVersion,
    /// Connection parameters, at least `user` and `database`.
    pub params: &'a [(&'a str, &'a str)],
    /// Protocol extension names, sent without annotations.
    pub extensions: &'a [&'a str],
}

impl FrontendProtocol for ClientHandshake<'_> {
    const MSGTYPE: u8 = b'V';

    fn size_hint(&self) -> u32 {
        let params = self
            .params
            .iter()
            .map(|(k, v)| k.prefixed_len() + v.prefixed_len())
            .sum::<u32>();
        let extensions = self
            .extensions
            .iter()
            .map(|name| name.prefixed_len() + 2)
            .sum::<u32>();
        2 + 2 + 2 + params + 2 + extensions
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u16(self.version.major);
        buf.put_u16(self.version.minor);
        buf.put_u16(self.params.len() as u16);
        for (key, value) in self.params {
            buf.put_prefixed_str(key);
            buf.put_prefixed_str(value);
        }
        buf.put_u16(self.extensions.len() as u16);
        for name in self.extensions {
            buf.put_prefixed_str(name);
            // annotations
            buf.put_u16(0);
        }
    }
}

/// Client first SASL message.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    pub method: &'a str,
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> u32 {
        self.method.prefixed_len() + self.data.prefixed_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_prefixed_str(self.method);
        buf.put_prefixed_bytes(self.data);
    }
}

/// Client SASL response to a challenge.
#[derive(Debug)]
pub struct SaslResponse<'a> {
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslResponse<'_> {
    const MSGTYPE: u8 = b'r';

    fn size_hint(&self) -> u32 {
        self.data.prefixed_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_prefixed_bytes(self.data);
    }
}

/// Fields shared by [`Parse`] and [`Execute`].
#[derive(Debug, Clone, Copy)]
pub struct QueryParams<'a> {
    pub capabilities: Capabilities,
    pub compilation_flags: CompilationFlags,
    pub implicit_limit: i64,
    pub format: IoFormat,
    pub cardinality: Cardinality,
    pub query: &'a str,
    pub state_type_id: Uuid,
    pub state_data: &'a [u8],
}

impl QueryParams<'_> {
    fn size_hint(&self) -> u32 {
        // annotations, capabilities, compilation flags, implicit limit,
        // format, cardinality
        2 + 8 + 8 + 8 + 1 + 1
            + self.query.prefixed_len()
            + 16
            + self.state_data.prefixed_len()
    }

    fn encode(&self, buf: &mut impl BufMut) {
        // no annotations
        buf.put_u16(0);
        buf.put_u64(self.capabilities.bits());
        buf.put_u64(self.compilation_flags.bits());
        buf.put_i64(self.implicit_limit);
        buf.put_u8(self.format as u8);
        buf.put_u8(self.cardinality as u8);
        buf.put_prefixed_str(self.query);
        buf.put_uuid(&self.state_type_id);
        buf.put_prefixed_bytes(self.state_data);
    }
}

/// Compile a query and describe its input and output types.
#[derive(Debug)]
pub struct Parse<'a> {
    pub params: QueryParams<'a>,
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> u32 {
        self.params.size_hint()
    }

    fn encode(self, mut buf: impl BufMut) {
        self.params.encode(&mut buf);
    }
}

/// Execute a query with encoded arguments.
#[derive(Debug)]
pub struct Execute<'a> {
    pub params: QueryParams<'a>,
    pub input_type_id: Uuid,
    pub output_type_id: Uuid,
    pub arguments: &'a [u8],
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'O';

    fn size_hint(&self) -> u32 {
        self.params.size_hint() + 16 + 16 + self.arguments.prefixed_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        self.params.encode(&mut buf);
        buf.put_uuid(&self.input_type_id);
        buf.put_uuid(&self.output_type_id);
        buf.put_prefixed_bytes(self.arguments);
    }
}

macro_rules! empty_message {
    ($($(#[$meta:meta])* $name:ident = $msgtype:literal;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            pub struct $name;

            impl FrontendProtocol for $name {
                const MSGTYPE: u8 = $msgtype;

                fn size_hint(&self) -> u32 {
                    0
                }

                fn encode(self, _: impl BufMut) { }
            }
        )*
    };
}

empty_message! {
    /// Ends the current command cycle, server answers with `ReadyForCommand`.
    Sync = b'S';
    /// Ask the server to flush its output buffer.
    Flush = b'H';
    /// Close the connection.
    Terminate = b'X';
}

/// Request a database dump.
#[derive(Debug)]
pub struct Dump;

impl FrontendProtocol for Dump {
    const MSGTYPE: u8 = b'>';

    fn size_hint(&self) -> u32 {
        2
    }

    fn encode(self, mut buf: impl BufMut) {
        // no annotations
        buf.put_u16(0);
    }
}
