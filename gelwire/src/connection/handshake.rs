//! Connection startup state machine.
//!
//! [`Handshake`] performs no io. The connection feeds it every server message
//! received after the client handshake, and performs the returned [`Step`].
use crate::{
    Result,
    common::{ByteStr, verbose},
    protocol::{
        ProtocolError, ProtocolVersion, ServerMessage, TransactionState,
        backend::{Authentication, ServerHandshake, StateDataDescription},
        frontend,
    },
    scram::ScramClient,
    transport::GelTransport,
};

use super::{ConnectionError, ConnectionErrorKind};

const SUGGESTED_POOL_CONCURRENCY: &[u8] = b"suggested_pool_concurrency";

/// Startup phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    TlsEstablishing,
    HandshakeSent,
    Authenticating(SaslPhase),
    /// Authentication succeeded, waiting for the first `ReadyForCommand`.
    Authenticated,
    Ready,
}

/// Which SASL message the client sent last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslPhase {
    Initial,
    Continue,
    Final,
}

/// What the connection should do after feeding a message.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Send(Outgoing),
    Wait,
    Ready,
}

/// Owned client message produced by the handshake.
#[derive(Debug, PartialEq, Eq)]
pub enum Outgoing {
    SaslInitialResponse { method: &'static str, data: String },
    SaslResponse { data: String },
}

impl Outgoing {
    /// Buffer the message into given transport.
    pub fn send<IO: GelTransport>(&self, io: &mut IO) {
        match self {
            Outgoing::SaslInitialResponse { method, data } => {
                io.send(frontend::SaslInitialResponse { method: *method, data: data.as_bytes() })
            }
            Outgoing::SaslResponse { data } => {
                io.send(frontend::SaslResponse { data: data.as_bytes() })
            }
        }
    }
}

/// Connection startup, from TLS to the first `ReadyForCommand`.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    version: ProtocolVersion,
    server_version: ProtocolVersion,
    user: ByteStr,
    password: ByteStr,
    scram: Option<ScramClient>,
    server_signature: Option<[u8; 32]>,
    server_key: Option<[u8; 32]>,
    state_description: Option<StateDataDescription>,
    suggested_pool_concurrency: Option<usize>,
    transaction_state: TransactionState,
}

impl Handshake {
    pub fn new(version: ProtocolVersion, user: ByteStr, password: ByteStr) -> Self {
        Self {
            state: HandshakeState::Disconnected,
            version,
            server_version: version,
            user,
            password,
            scram: None,
            server_signature: None,
            server_key: None,
            state_description: None,
            suggested_pool_concurrency: None,
            transaction_state: TransactionState::NotInTransaction,
        }
    }

    /// Use given SCRAM exchange instead of one with a random nonce.
    pub fn with_scram(mut self, scram: ScramClient) -> Self {
        self.scram = Some(scram);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn tls_started(&mut self) {
        self.state = HandshakeState::TlsEstablishing;
    }

    pub fn handshake_sent(&mut self) {
        self.state = HandshakeState::HandshakeSent;
    }

    /// Version announced by the server, equal to ours unless it sent
    /// `ServerHandshake`.
    pub fn server_version(&self) -> ProtocolVersion {
        self.server_version
    }

    /// Whether the server speaks a newer minor version than the client.
    pub fn is_degraded(&self) -> bool {
        self.server_version.minor > self.version.minor
    }

    pub fn server_key(&self) -> Option<&[u8; 32]> {
        self.server_key.as_ref()
    }

    pub fn suggested_pool_concurrency(&self) -> Option<usize> {
        self.suggested_pool_concurrency
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    /// Take the session state descriptor sent during startup.
    pub fn take_state_description(&mut self) -> Option<StateDataDescription> {
        self.state_description.take()
    }

    /// Advance with a server message.
    ///
    /// Any error is fatal for the connection attempt and resets the state to
    /// [`HandshakeState::Disconnected`].
    pub fn on_message(&mut self, message: ServerMessage) -> Result<Step> {
        let result = self.advance(message);
        if result.is_err() {
            self.state = HandshakeState::Disconnected;
        }
        result
    }

    fn advance(&mut self, message: ServerMessage) -> Result<Step> {
        use HandshakeState as S;

        let message = message.try_dberror()?;
        let msgtype = message.msgtype();

        verbose!(state = ?self.state, msg = ServerMessage::message_name(msgtype), "handshake");

        match (self.state, message) {
            (_, ServerMessage::LogMessage(_)) => Ok(Step::Wait),
            (S::HandshakeSent, ServerMessage::ServerHandshake(server)) => {
                self.check_version(&server)?;
                Ok(Step::Wait)
            }
            (S::HandshakeSent, ServerMessage::Authentication(Authentication::Ok)) => {
                self.state = S::Authenticated;
                Ok(Step::Wait)
            }
            (S::HandshakeSent, ServerMessage::Authentication(Authentication::Sasl { methods })) => {
                let method = ScramClient::select_method(&methods)?;
                let scram = self.scram.get_or_insert_with(|| ScramClient::new(&self.user));
                let data = scram.initial_message();
                self.state = S::Authenticating(SaslPhase::Initial);
                Ok(Step::Send(Outgoing::SaslInitialResponse { method, data }))
            }
            (
                S::Authenticating(SaslPhase::Initial),
                ServerMessage::Authentication(Authentication::SaslContinue { data }),
            ) => {
                let Some(scram) = &self.scram else {
                    return Err(ProtocolError::unexpected_phase(msgtype, "SaslInitial").into());
                };
                let fin = scram.final_message(&data, &self.password)?;
                self.server_signature = Some(fin.server_signature);
                self.state = S::Authenticating(SaslPhase::Continue);
                Ok(Step::Send(Outgoing::SaslResponse { data: fin.message }))
            }
            (
                S::Authenticating(SaslPhase::Continue),
                ServerMessage::Authentication(Authentication::SaslFinal { data }),
            ) => {
                let Some(expected) = self.server_signature.take() else {
                    return Err(ProtocolError::unexpected_phase(msgtype, "SaslContinue").into());
                };
                ScramClient::verify_server_final(&data, &expected)?;
                self.state = S::Authenticating(SaslPhase::Final);
                Ok(Step::Wait)
            }
            (S::Authenticating(SaslPhase::Final), ServerMessage::Authentication(Authentication::Ok)) => {
                self.scram = None;
                self.state = S::Authenticated;
                Ok(Step::Wait)
            }
            (S::Authenticated, ServerMessage::ServerKeyData(key)) => {
                self.server_key = Some(key.data);
                Ok(Step::Wait)
            }
            (S::Authenticated, ServerMessage::ParameterStatus(param)) => {
                if param.name.as_ref() == SUGGESTED_POOL_CONCURRENCY {
                    self.suggested_pool_concurrency = std::str::from_utf8(&param.value)
                        .ok()
                        .and_then(|v| v.trim().parse().ok());
                }
                Ok(Step::Wait)
            }
            (S::Authenticated, ServerMessage::StateDataDescription(state)) => {
                self.state_description = Some(state);
                Ok(Step::Wait)
            }
            (S::Authenticated, ServerMessage::ReadyForCommand(ready)) => {
                self.transaction_state = ready.transaction_state;
                self.state = S::Ready;
                Ok(Step::Ready)
            }
            (state, _) => Err(ProtocolError::unexpected_phase(msgtype, state.name()).into()),
        }
    }

    fn check_version(&mut self, server: &ServerHandshake) -> Result<(), ConnectionError> {
        let server = ProtocolVersion::new(server.major, server.minor);
        if server.major != self.version.major || server.minor < self.version.minor {
            return Err(ConnectionErrorKind::UnsupportedVersion {
                client: self.version,
                server,
            }
            .into());
        }

        self.server_version = server;

        if self.is_degraded() {
            #[cfg(feature = "log")]
            log::warn!(
                "server speaks protocol {server}, newer than {}, some features may not work",
                self.version
            );
        }

        Ok(())
    }
}

impl HandshakeState {
    fn name(&self) -> &'static str {
        match self {
            HandshakeState::Disconnected => "Disconnected",
            HandshakeState::TlsEstablishing => "TlsEstablishing",
            HandshakeState::HandshakeSent => "HandshakeSent",
            HandshakeState::Authenticating(SaslPhase::Initial) => "SaslInitial",
            HandshakeState::Authenticating(SaslPhase::Continue) => "SaslContinue",
            HandshakeState::Authenticating(SaslPhase::Final) => "SaslFinal",
            HandshakeState::Authenticated => "Authenticated",
            HandshakeState::Ready => "Ready",
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::{
        ErrorKind,
        protocol::{
            ErrorCode, ErrorSeverity,
            backend::{ErrorResponse, ParameterStatus, ReadyForCommand, ServerKeyData},
        },
        scram::ScramError,
    };

    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    fn handshake(password: &'static str) -> Handshake {
        let mut hs = Handshake::new(
            ProtocolVersion::V1_0,
            ByteStr::from_static("user"),
            ByteStr::from_static(password),
        )
        .with_scram(ScramClient::with_nonce("user", NONCE));
        hs.tls_started();
        hs.handshake_sent();
        hs
    }

    fn server_handshake(major: u16, minor: u16) -> ServerMessage {
        ServerMessage::ServerHandshake(ServerHandshake { major, minor, extensions: vec![] })
    }

    fn auth(auth: Authentication) -> ServerMessage {
        ServerMessage::Authentication(auth)
    }

    fn sasl() -> ServerMessage {
        auth(Authentication::Sasl { methods: vec![ByteStr::from_static("SCRAM-SHA-256")] })
    }

    #[test]
    fn same_version_proceeds_to_auth() {
        let mut hs = handshake("pencil");
        assert_eq!(hs.state(), HandshakeState::HandshakeSent);

        assert_eq!(hs.on_message(server_handshake(1, 0)).unwrap(), Step::Wait);
        assert!(!hs.is_degraded());
        assert_eq!(hs.state(), HandshakeState::HandshakeSent);

        let step = hs.on_message(sasl()).unwrap();
        assert_eq!(
            step,
            Step::Send(Outgoing::SaslInitialResponse {
                method: "SCRAM-SHA-256",
                data: format!("n,,n=user,r={NONCE}"),
            })
        );
        assert_eq!(hs.state(), HandshakeState::Authenticating(SaslPhase::Initial));
    }

    #[test]
    fn newer_minor_is_degraded() {
        let mut hs = handshake("pencil");
        assert_eq!(hs.on_message(server_handshake(1, 3)).unwrap(), Step::Wait);
        assert!(hs.is_degraded());
        assert_eq!(hs.server_version(), ProtocolVersion::new(1, 3));
    }

    #[test]
    fn major_mismatch_is_fatal() {
        let mut hs = handshake("pencil");
        let err = hs.on_message(server_handshake(2, 0)).unwrap_err();
        assert!(!err.is_retryable());
        assert!(!err.reconnect_required());
        let ErrorKind::Connection(err) = err.kind() else {
            panic!("expected connection error");
        };
        assert!(matches!(
            err.kind(),
            ConnectionErrorKind::UnsupportedVersion { server, .. } if *server == ProtocolVersion::V2_0
        ));
        assert_eq!(hs.state(), HandshakeState::Disconnected);
    }

    #[test]
    fn older_minor_is_fatal() {
        let mut hs = Handshake::new(
            ProtocolVersion::new(1, 2),
            ByteStr::from_static("user"),
            ByteStr::from_static(""),
        );
        hs.handshake_sent();
        assert!(hs.on_message(server_handshake(1, 0)).is_err());
    }

    #[test]
    fn full_scram_flow() {
        let mut hs = handshake("pencil");

        assert!(matches!(hs.on_message(sasl()).unwrap(), Step::Send(_)));

        let step = hs
            .on_message(auth(Authentication::SaslContinue { data: Bytes::from_static(SERVER_FIRST.as_bytes()) }))
            .unwrap();
        assert_eq!(step, Step::Send(Outgoing::SaslResponse { data: CLIENT_FINAL.into() }));
        assert_eq!(hs.state(), HandshakeState::Authenticating(SaslPhase::Continue));

        let step = hs
            .on_message(auth(Authentication::SaslFinal { data: Bytes::from_static(SERVER_FINAL.as_bytes()) }))
            .unwrap();
        assert_eq!(step, Step::Wait);
        assert_eq!(hs.state(), HandshakeState::Authenticating(SaslPhase::Final));

        assert_eq!(hs.on_message(auth(Authentication::Ok)).unwrap(), Step::Wait);
        assert_eq!(hs.state(), HandshakeState::Authenticated);

        let key = ServerMessage::ServerKeyData(ServerKeyData { data: [7; 32] });
        assert_eq!(hs.on_message(key).unwrap(), Step::Wait);

        let param = ServerMessage::ParameterStatus(ParameterStatus {
            name: Bytes::from_static(SUGGESTED_POOL_CONCURRENCY),
            value: Bytes::from_static(b"10"),
        });
        assert_eq!(hs.on_message(param).unwrap(), Step::Wait);

        let ready = ServerMessage::ReadyForCommand(ReadyForCommand {
            annotations: vec![],
            transaction_state: TransactionState::NotInTransaction,
        });
        assert_eq!(hs.on_message(ready).unwrap(), Step::Ready);

        assert_eq!(hs.state(), HandshakeState::Ready);
        assert_eq!(hs.server_key(), Some(&[7; 32]));
        assert_eq!(hs.suggested_pool_concurrency(), Some(10));
    }

    #[test]
    fn signature_mismatch_never_ready() {
        let mut hs = handshake("not pencil");
        hs.on_message(sasl()).unwrap();
        hs.on_message(auth(Authentication::SaslContinue { data: Bytes::from_static(SERVER_FIRST.as_bytes()) }))
            .unwrap();

        let err = hs
            .on_message(auth(Authentication::SaslFinal { data: Bytes::from_static(SERVER_FINAL.as_bytes()) }))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Scram(ScramError::InvalidSignature)));
        assert!(!err.is_retryable());
        assert_eq!(hs.state(), HandshakeState::Disconnected);

        // the machine is torn down, a late OK is a protocol violation
        assert!(hs.on_message(auth(Authentication::Ok)).is_err());
        assert_ne!(hs.state(), HandshakeState::Ready);
    }

    #[test]
    fn error_response_aborts() {
        let mut hs = handshake("pencil");
        let error = ServerMessage::ErrorResponse(ErrorResponse {
            severity: ErrorSeverity::Error,
            code: ErrorCode::AUTHENTICATION_ERROR,
            message: ByteStr::from_static("authentication failed"),
            attributes: vec![],
        });
        let err = hs.on_message(error).unwrap_err();
        assert_eq!(err.as_database_error().map(|e| e.code()), Some(ErrorCode::AUTHENTICATION_ERROR));
    }

    #[test]
    fn trust_auth_skips_sasl() {
        let mut hs = handshake("");
        assert_eq!(hs.on_message(auth(Authentication::Ok)).unwrap(), Step::Wait);
        let ready = ServerMessage::ReadyForCommand(ReadyForCommand {
            annotations: vec![],
            transaction_state: TransactionState::NotInTransaction,
        });
        assert_eq!(hs.on_message(ready).unwrap(), Step::Ready);
    }
}
