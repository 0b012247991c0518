//! Server messages
use bytes::Bytes;
use uuid::Uuid;

use super::{
    Capabilities, Cardinality, DatabaseError, ErrorCode, ErrorSeverity, LogSeverity,
    ProtocolError, TransactionState,
};
use crate::{binary::PacketReader, common::ByteStr};

/// A type that can be decoded from a server message.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Server messages
#[derive(Debug)]
pub enum ServerMessage {
    ServerHandshake(ServerHandshake),
    Authentication(Authentication),
    ErrorResponse(ErrorResponse),
    LogMessage(LogMessage),
    ParameterStatus(ParameterStatus),
    ReadyForCommand(ReadyForCommand),
    CommandComplete(CommandComplete),
    CommandDataDescription(CommandDataDescription),
    StateDataDescription(StateDataDescription),
    Data(Data),
    ServerKeyData(ServerKeyData),
    RestoreReady(RestoreReady),
    DumpHeader(DumpHeader),
    DumpBlock(DumpBlock),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl ServerMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Name of a message type, for diagnostics.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }

            /// Whether the message type is known to the client.
            pub fn is_known(msgtype: u8) -> bool {
                matches!(msgtype, $($name::MSGTYPE)|*)
            }
        }

        impl BackendProtocol for ServerMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    ServerHandshake,
    Authentication,
    ErrorResponse,
    LogMessage,
    ParameterStatus,
    ReadyForCommand,
    CommandComplete,
    CommandDataDescription,
    StateDataDescription,
    Data,
    ServerKeyData,
    RestoreReady,
    DumpHeader,
    DumpBlock,
}

impl ServerMessage {
    /// Turn `ErrorResponse` into [`Err`].
    pub fn try_dberror(self) -> Result<Self, DatabaseError> {
        match self {
            Self::ErrorResponse(err) => Err(err.into_database_error()),
            ok => Ok(ok),
        }
    }
}

macro_rules! assert_msgtype {
    ($self:ident,$typ:ident) => {
        if $self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected($self::MSGTYPE, $typ))
        }
    };
}

macro_rules! read_enum {
    ($ty:ident, $field:literal, $value:expr) => {{
        let value = $value;
        $ty::from_u8(value).ok_or_else(|| ProtocolError::invalid($field, value))?
    }};
}

/// Server protocol extension.
#[derive(Debug)]
pub struct ProtocolExtension {
    pub name: ByteStr,
    pub annotations: Vec<(ByteStr, ByteStr)>,
}

/// Response to the client handshake when the server picks another version.
#[derive(Debug)]
pub struct ServerHandshake {
    pub major: u16,
    pub minor: u16,
    pub extensions: Vec<ProtocolExtension>,
}

impl ServerHandshake {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for ServerHandshake {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ServerHandshake, msgtype);
        let mut r = PacketReader::new(body);
        let major = r.read_u16()?;
        let minor = r.read_u16()?;
        let count = r.read_u16()?;
        let mut extensions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            extensions.push(ProtocolExtension {
                name: r.read_str()?,
                annotations: r.read_annotations()?,
            });
        }
        Ok(Self { major, minor, extensions })
    }
}

/// Authentication status.
#[derive(Debug)]
pub enum Authentication {
    /// Int32(0) Authentication was successful.
    Ok,
    /// Int32(10) SASL authentication is required, with the methods the
    /// server supports in its order of preference.
    Sasl {
        methods: Vec<ByteStr>,
    },
    /// Int32(11) SASL challenge.
    SaslContinue {
        data: Bytes,
    },
    /// Int32(12) SASL outcome, carrying the server signature.
    SaslFinal {
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(Authentication, msgtype);
        let mut r = PacketReader::new(body);
        let auth = match r.read_u32()? {
            0 => Authentication::Ok,
            10 => Authentication::Sasl { methods: r.read_string_array()? },
            11 => Authentication::SaslContinue { data: r.read_required_bytes()? },
            12 => Authentication::SaslFinal { data: r.read_required_bytes()? },
            auth => return Err(ProtocolError::UnknownAuth(auth)),
        };
        Ok(auth)
    }
}

/// Server error.
#[derive(Debug)]
pub struct ErrorResponse {
    pub severity: ErrorSeverity,
    pub code: ErrorCode,
    pub message: ByteStr,
    pub attributes: Vec<(u16, Bytes)>,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    pub fn into_database_error(self) -> DatabaseError {
        DatabaseError::new(self.severity, self.code, self.message.as_str(), self.attributes)
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ErrorResponse, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            severity: read_enum!(ErrorSeverity, "error severity", r.read_u8()?),
            code: ErrorCode(r.read_u32()?),
            message: r.read_str()?,
            attributes: r.read_attributes()?,
        })
    }
}

/// Server log message.
#[derive(Debug)]
pub struct LogMessage {
    pub severity: LogSeverity,
    pub code: ErrorCode,
    pub text: ByteStr,
    pub annotations: Vec<(ByteStr, ByteStr)>,
}

impl LogMessage {
    pub const MSGTYPE: u8 = b'L';
}

impl BackendProtocol for LogMessage {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(LogMessage, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            severity: read_enum!(LogSeverity, "log severity", r.read_u8()?),
            code: ErrorCode(r.read_u32()?),
            text: r.read_str()?,
            annotations: r.read_annotations()?,
        })
    }
}

/// Server parameter value.
#[derive(Debug)]
pub struct ParameterStatus {
    pub name: Bytes,
    pub value: Bytes,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ParameterStatus, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            name: r.read_required_bytes()?,
            value: r.read_required_bytes()?,
        })
    }
}

/// The server is ready for a new command.
#[derive(Debug)]
pub struct ReadyForCommand {
    pub annotations: Vec<(ByteStr, ByteStr)>,
    pub transaction_state: TransactionState,
}

impl ReadyForCommand {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForCommand {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ReadyForCommand, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            annotations: r.read_annotations()?,
            transaction_state: read_enum!(TransactionState, "transaction state", r.read_u8()?),
        })
    }
}

/// Successful completion of a command.
#[derive(Debug)]
pub struct CommandComplete {
    pub annotations: Vec<(ByteStr, ByteStr)>,
    pub capabilities: Capabilities,
    pub status: ByteStr,
    pub state_type_id: Uuid,
    pub state_data: Option<Bytes>,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandComplete, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            annotations: r.read_annotations()?,
            capabilities: Capabilities::from_bits(r.read_u64()?),
            status: r.read_str()?,
            state_type_id: r.read_uuid()?,
            state_data: r.read_bytes()?,
        })
    }
}

/// Type descriptors of a parsed command.
#[derive(Debug)]
pub struct CommandDataDescription {
    pub annotations: Vec<(ByteStr, ByteStr)>,
    pub capabilities: Capabilities,
    pub cardinality: Cardinality,
    pub input_type_id: Uuid,
    pub input_descriptors: Bytes,
    pub output_type_id: Uuid,
    pub output_descriptors: Bytes,
}

impl CommandDataDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for CommandDataDescription {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandDataDescription, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            annotations: r.read_annotations()?,
            capabilities: Capabilities::from_bits(r.read_u64()?),
            cardinality: read_enum!(Cardinality, "cardinality", r.read_u8()?),
            input_type_id: r.read_uuid()?,
            input_descriptors: r.read_bytes()?.unwrap_or_default(),
            output_type_id: r.read_uuid()?,
            output_descriptors: r.read_bytes()?.unwrap_or_default(),
        })
    }
}

/// Type descriptor of the session state.
#[derive(Debug)]
pub struct StateDataDescription {
    pub type_id: Uuid,
    pub descriptors: Bytes,
}

impl StateDataDescription {
    pub const MSGTYPE: u8 = b's';
}

impl BackendProtocol for StateDataDescription {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(StateDataDescription, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            type_id: r.read_uuid()?,
            descriptors: r.read_bytes()?.unwrap_or_default(),
        })
    }
}

/// One result row.
#[derive(Debug)]
pub struct Data {
    pub payload: Bytes,
}

impl Data {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for Data {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(Data, msgtype);
        let mut r = PacketReader::new(body);
        let count = r.read_u16()?;
        if count != 1 {
            return Err(ProtocolError::DataCount(count));
        }
        Ok(Self { payload: r.read_required_bytes()? })
    }
}

/// Opaque key identifying the session.
#[derive(Debug)]
pub struct ServerKeyData {
    pub data: [u8; 32],
}

impl ServerKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for ServerKeyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ServerKeyData, msgtype);
        let mut r = PacketReader::new(body);
        let mut data = [0; 32];
        data.copy_from_slice(&r.read_raw(32)?);
        Ok(Self { data })
    }
}

/// The server accepted a restore request.
#[derive(Debug)]
pub struct RestoreReady {
    pub annotations: Vec<(ByteStr, ByteStr)>,
    pub jobs: u16,
}

impl RestoreReady {
    pub const MSGTYPE: u8 = b'+';
}

impl BackendProtocol for RestoreReady {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(RestoreReady, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self {
            annotations: r.read_annotations()?,
            jobs: r.read_u16()?,
        })
    }
}

#[derive(Debug)]
pub struct DumpTypeInfo {
    pub name: ByteStr,
    pub class: ByteStr,
    pub id: Uuid,
}

#[derive(Debug)]
pub struct DumpObjectDescriptor {
    pub object_id: Uuid,
    pub description: Bytes,
    pub dependencies: Vec<Uuid>,
}

/// First message of a dump.
#[derive(Debug)]
pub struct DumpHeader {
    pub attributes: Vec<(u16, Bytes)>,
    pub major: u16,
    pub minor: u16,
    pub schema_ddl: ByteStr,
    pub types: Vec<DumpTypeInfo>,
    pub descriptors: Vec<DumpObjectDescriptor>,
}

impl DumpHeader {
    pub const MSGTYPE: u8 = b'@';
}

impl BackendProtocol for DumpHeader {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(DumpHeader, msgtype);
        let mut r = PacketReader::new(body);
        let attributes = r.read_attributes()?;
        let major = r.read_u16()?;
        let minor = r.read_u16()?;
        let schema_ddl = r.read_str()?;

        let count = r.read_u32()?;
        let mut types = Vec::with_capacity((count as usize).min(r.remaining()));
        for _ in 0..count {
            types.push(DumpTypeInfo {
                name: r.read_str()?,
                class: r.read_str()?,
                id: r.read_uuid()?,
            });
        }

        let count = r.read_u32()?;
        let mut descriptors = Vec::with_capacity((count as usize).min(r.remaining()));
        for _ in 0..count {
            let object_id = r.read_uuid()?;
            let description = r.read_required_bytes()?;
            let deps = r.read_u16()?;
            let dependencies = (0..deps).map(|_| r.read_uuid()).collect::<Result<_, _>>()?;
            descriptors.push(DumpObjectDescriptor { object_id, description, dependencies });
        }

        Ok(Self { attributes, major, minor, schema_ddl, types, descriptors })
    }
}

/// One block of dump data.
#[derive(Debug)]
pub struct DumpBlock {
    pub attributes: Vec<(u16, Bytes)>,
}

impl DumpBlock {
    pub const MSGTYPE: u8 = b'=';
}

impl BackendProtocol for DumpBlock {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(DumpBlock, msgtype);
        let mut r = PacketReader::new(body);
        Ok(Self { attributes: r.read_attributes()? })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::binary::PacketWriter;

    fn body(f: impl FnOnce(&mut PacketWriter)) -> Bytes {
        let mut w = PacketWriter::new();
        f(&mut w);
        w.finish().unwrap()
    }

    #[test]
    fn ready_for_command() {
        let body = body(|w| {
            w.write_u16(0).unwrap();
            w.write_u8(0x54).unwrap();
        });
        let msg = ServerMessage::decode(b'Z', body).unwrap();
        let ServerMessage::ReadyForCommand(ready) = msg else { panic!("expected ReadyForCommand") };
        assert_eq!(ready.transaction_state, TransactionState::InTransaction);
    }

    #[test]
    fn data_requires_one_element() {
        let two = body(|w| {
            w.write_u16(2).unwrap();
            w.write_bytes(b"a").unwrap();
            w.write_bytes(b"b").unwrap();
        });
        assert!(matches!(Data::decode(b'D', two), Err(ProtocolError::DataCount(2))));

        let one = body(|w| {
            w.write_u16(1).unwrap();
            w.write_bytes(b"abc").unwrap();
        });
        assert_eq!(&Data::decode(b'D', one).unwrap().payload[..], b"abc");
    }

    #[test]
    fn sasl_methods() {
        let body = body(|w| {
            w.write_u32(10).unwrap();
            w.write_u32(1).unwrap();
            w.write_str("SCRAM-SHA-256").unwrap();
        });
        let Authentication::Sasl { methods } = Authentication::decode(b'R', body).unwrap() else {
            panic!("expected sasl")
        };
        assert_eq!(methods, ["SCRAM-SHA-256"]);
    }

    #[test]
    fn error_response_keeps_attributes() {
        let body = body(|w| {
            w.write_u8(0x78).unwrap();
            w.write_u32(ErrorCode::TRANSACTION_CONFLICT_ERROR.0).unwrap();
            w.write_str("conflict").unwrap();
            w.write_u16(1).unwrap();
            w.write_u16(0x0001).unwrap();
            w.write_bytes(b"retry").unwrap();
        });
        let err = ServerMessage::decode(b'E', body).unwrap().try_dberror().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.hint(), Some("retry"));
        assert_eq!(err.to_string(), "TransactionConflictError: conflict");
    }

    #[test]
    fn wrong_and_unknown_tags() {
        let err = ReadyForCommand::decode(b'C', Bytes::new()).unwrap_err();
        assert_eq!(err.to_string(), "Expected message `ReadyForCommand` found `CommandComplete`");
        assert!(ServerMessage::decode(b'!', Bytes::new()).is_err());
        assert!(!ServerMessage::is_known(b'!'));
    }

    #[test]
    fn truncated_body() {
        assert!(matches!(
            ServerKeyData::decode(b'K', Bytes::from_static(&[0; 8])),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
