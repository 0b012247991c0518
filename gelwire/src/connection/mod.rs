//! Gel connection.
//!
//! Connecting goes through the following steps:
//!
//! 1. open a tcp socket, retrying transient failures
//! 2. TLS handshake with the `edgedb-binary` ALPN
//! 3. `ClientHandshake` carrying the connection parameters
//! 4. [`Handshake`] drives authentication up to the first `ReadyForCommand`
//!
//! The whole sequence is bounded by [`Config::connect_timeout`].
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::{
    ErrorKind, Result,
    binary::{PacketReader, PacketWriter},
    codec::{Codec, CodecRegistry, PreparedCodecs, QueryCodecs, Value, query_key},
    common::verbose,
    net::Socket,
    protocol::{
        Capabilities, Cardinality, CompilationFlags, ErrorCode, IoFormat, ProtocolError,
        ProtocolVersion, ServerMessage, TransactionState,
        backend::{CommandDataDescription, ReadyForCommand, StateDataDescription},
        frontend::{self, QueryParams},
    },
    transport::{GelTransport, GelTransportExt},
};

mod config;
mod error;
mod handshake;
mod stream;

pub use config::{Config, ConfigError, TlsMode};
pub use error::{ConnectionError, ConnectionErrorKind};
pub use handshake::{Handshake, HandshakeState, Outgoing, SaslPhase, Step};
pub use stream::GelStream;

/// A query is run at most this many times when the session state is stale.
const STATE_MISMATCH_ATTEMPTS: u32 = 2;

#[cfg(feature = "tokio")]
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

/// Result of [`Connection::execute_query`].
#[derive(Debug)]
pub struct QueryResult {
    pub capabilities: Capabilities,
    pub values: Vec<Value>,
}

/// Session state sent with every query.
#[derive(Debug, Default)]
struct SessionState {
    type_id: Uuid,
    data: Bytes,
}

/// Opens connections, one attempt at a time.
#[cfg(feature = "tokio")]
#[derive(Debug)]
pub struct Connector {
    config: Config,
    registry: Arc<CodecRegistry>,
    guard: tokio::sync::Mutex<()>,
}

#[cfg(feature = "tokio")]
impl Connector {
    pub fn new(config: Config, registry: Arc<CodecRegistry>) -> Self {
        Self { config, registry, guard: tokio::sync::Mutex::new(()) }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a new connection.
    ///
    /// Concurrent calls are serialized. A timeout is fatal, transient
    /// failures are retried up to [`Config::max_connection_attempts`].
    pub async fn connect(&self) -> Result<Connection> {
        let _guard = self.guard.lock().await;
        verbose!(host = self.config.host(), port = self.config.port(), "connecting");

        let connect = self.establish();
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(err)) => {
                #[cfg(feature = "log")]
                log::error!("failed to connect to {}:{}: {err}", self.config.host, self.config.port);
                Err(err)
            }
            Err(_) => Err(ConnectionError::from(ConnectionErrorKind::Timeout).into()),
        }
    }

    async fn establish(&self) -> Result<Connection> {
        let config = &self.config;
        let mut handshake =
            Handshake::new(config.protocol_version, config.user.clone(), config.password.clone());

        #[cfg(feature = "tls")]
        let connector = {
            let tls = crate::net::tls::client_config(config.tls_mode, config.tls_ca.as_deref())?;
            tokio_rustls::TlsConnector::from(Arc::new(tls))
        };

        let mut attempts = 0;
        let socket = loop {
            attempts += 1;

            let socket = Socket::connect_tcp(&config.host, config.port).await;

            #[cfg(feature = "tls")]
            let socket = match socket {
                Ok(socket) => {
                    handshake.tls_started();
                    socket.upgrade_tls(&connector, &config.host).await
                }
                Err(err) => Err(err),
            };

            match socket {
                Ok(socket) => break socket,
                Err(last) if attempts >= config.max_connection_attempts => {
                    return Err(ConnectionError::from(ConnectionErrorKind::Failed { attempts, last }).into());
                }
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::debug!("connect attempt {attempts} failed: {_err}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        };

        Connection::startup(GelStream::new(socket), config, self.registry.clone(), handshake).await
    }
}

/// A single connection to the server.
#[derive(Debug)]
pub struct Connection {
    stream: GelStream,
    registry: Arc<CodecRegistry>,
    version: ProtocolVersion,
    implicit_limit: i64,
    state: SessionState,
    transaction_state: TransactionState,
    server_key: Option<[u8; 32]>,
    suggested_pool_concurrency: Option<usize>,
    connected: bool,
}

impl Connection {
    /// Open a connection with a one-off [`Connector`].
    #[cfg(feature = "tokio")]
    pub async fn connect(config: Config, registry: Arc<CodecRegistry>) -> Result<Connection> {
        Connector::new(config, registry).connect().await
    }

    /// Connect using config from environment variables.
    #[cfg(feature = "tokio")]
    pub async fn connect_env(registry: Arc<CodecRegistry>) -> Result<Connection> {
        Self::connect(Config::from_env()?, registry).await
    }

    /// Send the client handshake and authenticate over an established stream.
    pub(crate) async fn startup(
        mut stream: GelStream,
        config: &Config,
        registry: Arc<CodecRegistry>,
        mut handshake: Handshake,
    ) -> Result<Connection> {
        let mut params = vec![("user", config.user()), ("database", config.database())];
        if let Some(branch) = config.branch() {
            params.push(("branch", branch));
        }
        if let Some(secret_key) = config.secret_key.as_deref() {
            params.push(("secret_key", secret_key));
        }

        stream.send(frontend::ClientHandshake {
            version: config.protocol_version,
            params: &params,
            extensions: &[],
        });
        stream.flush().await.map_err(ConnectionError::transient)?;
        handshake.handshake_sent();

        loop {
            let message = stream.recv::<ServerMessage>().await.map_err(transient)?;
            match handshake.on_message(message)? {
                Step::Send(outgoing) => {
                    outgoing.send(&mut stream);
                    stream.flush().await.map_err(ConnectionError::transient)?;
                }
                Step::Wait => {}
                Step::Ready => break,
            }
        }

        verbose!(version = %handshake.server_version(), "connection ready");

        let mut conn = Connection {
            stream,
            registry,
            version: config.protocol_version,
            implicit_limit: config.implicit_limit,
            state: SessionState::default(),
            transaction_state: handshake.transaction_state(),
            server_key: handshake.server_key().copied(),
            suggested_pool_concurrency: handshake.suggested_pool_concurrency(),
            connected: true,
        };

        if let Some(description) = handshake.take_state_description() {
            conn.apply_state(description)?;
        }

        Ok(conn)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn server_key(&self) -> Option<&[u8; 32]> {
        self.server_key.as_ref()
    }

    /// Pool size hint sent by the server.
    pub fn suggested_pool_concurrency(&self) -> Option<usize> {
        self.suggested_pool_concurrency
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    /// Run a query and decode every result element.
    ///
    /// Codecs of a query are cached in the registry, so the query is parsed
    /// only the first time it is seen.
    pub async fn execute_query(
        &mut self,
        query: &str,
        args: &Value,
        capabilities: Capabilities,
        cardinality: Cardinality,
        format: IoFormat,
    ) -> Result<QueryResult> {
        if !self.connected {
            return Err(ConnectionError::from(ConnectionErrorKind::Closed).into());
        }

        verbose!(query, "execute query");

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.execute_once(query, args, capabilities, cardinality, format).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            let state_mismatch = err
                .as_database_error()
                .is_some_and(|e| e.code() == ErrorCode::STATE_MISMATCH_ERROR);
            if state_mismatch && attempt < STATE_MISMATCH_ATTEMPTS {
                verbose!("session state mismatch, retrying");
                continue;
            }

            if err.reconnect_required() || matches!(err.kind(), ErrorKind::Io(_) | ErrorKind::Protocol(_)) {
                self.connected = false;
            }

            return Err(err);
        }
    }

    async fn execute_once(
        &mut self,
        query: &str,
        args: &Value,
        capabilities: Capabilities,
        cardinality: Cardinality,
        format: IoFormat,
    ) -> Result<QueryResult> {
        let key = query_key(query, cardinality, format);

        let codecs = match self.registry.query_codecs(self.version, key) {
            Some(codecs) => {
                verbose!(key, "query codecs cache hit");
                codecs
            }
            None if format == IoFormat::None && args.is_nothing() => {
                let null = Arc::new(Codec::Null);
                PreparedCodecs {
                    input_id: Uuid::nil(),
                    input: null.clone(),
                    output_id: Uuid::nil(),
                    output: null,
                    cardinality: Cardinality::NoResult,
                    capabilities,
                }
            }
            None => self.parse(key, query, capabilities, cardinality, format).await?,
        };

        let mut w = PacketWriter::new();
        codecs.input.encode_arguments(&mut w, args)?;
        let arguments = w.finish()?;

        self.stream.send(frontend::Execute {
            params: query_params(&self.state, self.implicit_limit, query, capabilities, cardinality, format),
            input_type_id: codecs.input_id,
            output_type_id: codecs.output_id,
            arguments: &arguments,
        });
        self.stream.send(frontend::Sync);
        self.stream.flush().await?;

        let mut output = codecs.output;
        let mut result = QueryResult { capabilities: codecs.capabilities, values: vec![] };
        let mut failure = None;

        loop {
            match self.stream.recv::<ServerMessage>().await? {
                ServerMessage::CommandDataDescription(description) => {
                    match self.apply_description(key, description) {
                        Ok(codecs) => output = codecs.output,
                        Err(err) => record(&mut failure, err),
                    }
                }
                ServerMessage::StateDataDescription(description) => {
                    if let Err(err) = self.apply_state(description) {
                        record(&mut failure, err);
                    }
                }
                ServerMessage::Data(data) if failure.is_none() => {
                    match output.decode(&mut PacketReader::new(data.payload)) {
                        Ok(value) => result.values.push(value),
                        Err(err) => record(&mut failure, err.into()),
                    }
                }
                ServerMessage::Data(_) => {}
                ServerMessage::CommandComplete(complete) => {
                    result.capabilities = complete.capabilities;
                }
                ServerMessage::ErrorResponse(err) => {
                    record(&mut failure, err.into_database_error().with_query(query).into());
                }
                ServerMessage::ReadyForCommand(ready) => {
                    self.on_ready(ready);
                    break;
                }
                other => {
                    record(&mut failure, ProtocolError::unexpected_phase(other.msgtype(), "Execute").into());
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    async fn parse(
        &mut self,
        key: u64,
        query: &str,
        capabilities: Capabilities,
        cardinality: Cardinality,
        format: IoFormat,
    ) -> Result<PreparedCodecs> {
        self.stream.send(frontend::Parse {
            params: query_params(&self.state, self.implicit_limit, query, capabilities, cardinality, format),
        });
        self.stream.send(frontend::Sync);
        self.stream.flush().await?;

        let mut codecs = None;
        let mut failure = None;

        loop {
            match self.stream.recv::<ServerMessage>().await? {
                ServerMessage::CommandDataDescription(description) => {
                    match self.apply_description(key, description) {
                        Ok(ok) => codecs = Some(ok),
                        Err(err) => record(&mut failure, err),
                    }
                }
                ServerMessage::StateDataDescription(description) => {
                    if let Err(err) = self.apply_state(description) {
                        record(&mut failure, err);
                    }
                }
                ServerMessage::ErrorResponse(err) => {
                    record(&mut failure, err.into_database_error().with_query(query).into());
                }
                ServerMessage::ReadyForCommand(ready) => {
                    self.on_ready(ready);
                    break;
                }
                other => {
                    record(&mut failure, ProtocolError::unexpected_phase(other.msgtype(), "Parse").into());
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        codecs.ok_or_else(|| {
            ProtocolError::unexpected(CommandDataDescription::MSGTYPE, ReadyForCommand::MSGTYPE).into()
        })
    }

    fn apply_description(&self, key: u64, description: CommandDataDescription) -> Result<PreparedCodecs> {
        let input = self.registry.build(self.version, description.input_type_id, description.input_descriptors)?;
        let output = self.registry.build(self.version, description.output_type_id, description.output_descriptors)?;

        self.registry.update_query_codecs(self.version, key, QueryCodecs {
            input_id: description.input_type_id,
            output_id: description.output_type_id,
            cardinality: description.cardinality,
            capabilities: description.capabilities,
        });

        Ok(PreparedCodecs {
            input_id: description.input_type_id,
            input,
            output_id: description.output_type_id,
            output,
            cardinality: description.cardinality,
            capabilities: description.capabilities,
        })
    }

    /// Adopt a new session state type, sending the default state with it.
    fn apply_state(&mut self, description: StateDataDescription) -> Result<()> {
        let codec = self.registry.build(self.version, description.type_id, description.descriptors)?;

        let mut w = PacketWriter::new();
        if !matches!(*codec, Codec::Null) {
            codec.encode(&mut w, &Value::Object(vec![]))?;
        }

        verbose!(type_id = %description.type_id, "session state descriptor");
        self.state = SessionState { type_id: description.type_id, data: w.finish()? };
        Ok(())
    }

    fn on_ready(&mut self, ready: ReadyForCommand) {
        self.transaction_state = ready.transaction_state;
    }

    /// Gracefully close the connection.
    pub async fn close(mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            self.stream.send(frontend::Terminate);
            self.stream.flush().await?;
            self.stream.shutdown().await?;
        }
        Ok(())
    }
}

fn query_params<'a>(
    state: &'a SessionState,
    implicit_limit: i64,
    query: &'a str,
    capabilities: Capabilities,
    cardinality: Cardinality,
    format: IoFormat,
) -> QueryParams<'a> {
    QueryParams {
        capabilities,
        compilation_flags: CompilationFlags::NONE,
        implicit_limit,
        format,
        cardinality,
        query,
        state_type_id: state.type_id,
        state_data: &state.data,
    }
}

/// Io failures while starting up are transient connection failures.
fn transient(err: crate::Error) -> crate::Error {
    match err.into_kind() {
        ErrorKind::Io(e) => ConnectionError::transient(e).into(),
        kind => kind.into(),
    }
}

/// Keep the first failure, the rest of the response is still drained.
fn record(failure: &mut Option<crate::Error>, err: crate::Error) {
    if failure.is_none() {
        *failure = Some(err);
    }
}

#[cfg(all(test, feature = "tokio"))]
mod test {
    use bytes::{BufMut, BytesMut};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    const INT64: Uuid = Uuid::from_u128(0x105);

    fn frame(buf: &mut BytesMut, msgtype: u8, body: impl FnOnce(&mut BytesMut)) {
        let mut payload = BytesMut::new();
        body(&mut payload);
        buf.put_u8(msgtype);
        buf.put_u32(4 + payload.len() as u32);
        buf.put_slice(&payload);
    }

    fn ready(buf: &mut BytesMut) {
        frame(buf, b'Z', |b| {
            b.put_u16(0);
            b.put_u8(b'I');
        });
    }

    fn results(buf: &mut BytesMut, values: &[i64]) {
        for value in values {
            frame(buf, b'D', |b| {
                b.put_u16(1);
                b.put_u32(8);
                b.put_i64(*value);
            });
        }
        frame(buf, b'C', |b| {
            b.put_u16(0);
            b.put_u64(0);
            b.put_u32(6);
            b.put_slice(b"SELECT");
            b.put_u128(0);
            b.put_u32(0);
        });
        ready(buf);
    }

    fn msgtypes(mut bytes: &[u8]) -> Vec<u8> {
        let mut types = vec![];
        while bytes.len() >= 5 {
            let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
            types.push(bytes[0]);
            bytes = &bytes[1 + len..];
        }
        types
    }

    #[tokio::test]
    async fn query_then_cache_hit() {
        let (client, mut server) = tokio::io::duplex(4096);

        let mut responses = BytesMut::new();
        // trust authentication
        frame(&mut responses, b'R', |b| b.put_u32(0));
        ready(&mut responses);
        // parse
        frame(&mut responses, b'T', |b| {
            b.put_u16(0);
            b.put_u64(0);
            b.put_u8(Cardinality::Many as u8);
            b.put_u128(0);
            b.put_u32(0);
            b.put_u128(INT64.as_u128());
            b.put_u32(0);
        });
        ready(&mut responses);
        // two executes
        results(&mut responses, &[1, 2]);
        results(&mut responses, &[3]);

        let server = tokio::spawn(async move {
            server.write_all(&responses).await.unwrap();
            let mut sent = vec![];
            server.read_to_end(&mut sent).await.unwrap();
            sent
        });

        let config = Config::default().with_user("admin").with_branch("main");
        let handshake = Handshake::new(config.protocol_version, config.user.clone(), config.password.clone());
        let mut conn = Connection::startup(
            GelStream::new(Socket::memory(client)),
            &config,
            Arc::new(CodecRegistry::new()),
            handshake,
        )
        .await
        .unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.transaction_state(), TransactionState::NotInTransaction);

        let query = "select {1, 2}";
        let result = conn
            .execute_query(query, &Value::Nothing, Capabilities::ALL, Cardinality::Many, IoFormat::Binary)
            .await
            .unwrap();
        assert_eq!(result.values, [Value::Int64(1), Value::Int64(2)]);

        let result = conn
            .execute_query(query, &Value::Nothing, Capabilities::ALL, Cardinality::Many, IoFormat::Binary)
            .await
            .unwrap();
        assert_eq!(result.values, [Value::Int64(3)]);

        conn.close().await.unwrap();

        let sent = server.await.unwrap();
        assert_eq!(msgtypes(&sent), b"VPSOSOSX");
    }

    #[tokio::test]
    async fn closed_connection_rejects_queries() {
        let (client, mut server) = tokio::io::duplex(256);

        let mut responses = BytesMut::new();
        frame(&mut responses, b'R', |b| b.put_u32(0));
        ready(&mut responses);
        server.write_all(&responses).await.unwrap();

        let config = Config::default();
        let handshake = Handshake::new(config.protocol_version, config.user.clone(), config.password.clone());
        let mut conn = Connection::startup(
            GelStream::new(Socket::memory(client)),
            &config,
            Arc::new(CodecRegistry::new()),
            handshake,
        )
        .await
        .unwrap();

        // server goes away mid query
        drop(server);
        let err = conn
            .execute_query("select 1", &Value::Nothing, Capabilities::ALL, Cardinality::One, IoFormat::Binary)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert!(!conn.is_connected());

        let err = conn
            .execute_query("select 1", &Value::Nothing, Capabilities::ALL, Cardinality::One, IoFormat::Binary)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
    fn connection_kind(err: &crate::Error) -> Option<&ConnectionErrorKind> {
        match err.kind() {
            ErrorKind::Connection(e) => Some(e.kind()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn startup_io_failure_is_transient() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let config = Config::default();
        let handshake = Handshake::new(config.protocol_version, config.user.clone(), config.password.clone());
        let err = Connection::startup(
            GelStream::new(Socket::memory(client)),
            &config,
            Arc::new(CodecRegistry::new()),
            handshake,
        )
        .await
        .unwrap_err();

        assert!(matches!(connection_kind(&err), Some(ConnectionErrorKind::Transient(_))));
        assert!(err.is_retryable());
        assert!(err.reconnect_required());
    }

    #[tokio::test]
    async fn server_hangs_up_during_startup() {
        let (client, mut server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            // read the client handshake, then go away
            let mut header = [0; 5];
            server.read_exact(&mut header).await.unwrap();
        });

        let config = Config::default();
        let handshake = Handshake::new(config.protocol_version, config.user.clone(), config.password.clone());
        let err = Connection::startup(
            GelStream::new(Socket::memory(client)),
            &config,
            Arc::new(CodecRegistry::new()),
            handshake,
        )
        .await
        .unwrap_err();
        server.await.unwrap();

        assert!(matches!(connection_kind(&err), Some(ConnectionErrorKind::Transient(_))));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn connect_attempts_are_bounded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = Config::default()
            .with_host("127.0.0.1")
            .with_port(port)
            .with_max_connection_attempts(2);
        let err = Connector::new(config, Arc::new(CodecRegistry::new()))
            .connect()
            .await
            .unwrap_err();

        assert!(matches!(
            connection_kind(&err),
            Some(ConnectionErrorKind::Failed { attempts: 2, .. })
        ));
        assert!(!err.is_retryable());
        assert!(!err.reconnect_required());
    }

    #[tokio::test]
    async fn connect_timeout_is_fatal() {
        // the backlog accepts the socket, nothing ever answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = Config::default()
            .with_host("127.0.0.1")
            .with_port(port)
            .with_connect_timeout(std::time::Duration::from_millis(50));
        let err = Connector::new(config, Arc::new(CodecRegistry::new()))
            .connect()
            .await
            .unwrap_err();

        assert!(matches!(connection_kind(&err), Some(ConnectionErrorKind::Timeout)));
        assert!(!err.is_retryable());
        drop(listener);
    }
}
