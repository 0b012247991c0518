use std::io;

/// Either a plain `TcpStream` or a TLS stream over it, which implement
/// `AsyncRead` and `AsyncWrite` transparently.
///
/// require `tokio` feature, otherwise panic at runtime
pub struct Socket {
    kind: Kind,
}

enum Kind {
    #[cfg(feature = "tokio")]
    TokioTcp(tokio::net::TcpStream),
    #[cfg(feature = "tls")]
    TokioTls(Box<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>),
    #[cfg(all(test, feature = "tokio"))]
    Memory(tokio::io::DuplexStream),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        #[cfg(feature = "tokio")]
        {
            let socket = tokio::net::TcpStream::connect((host, port)).await?;
            socket.set_nodelay(true)?;
            Ok(Socket { kind: Kind::TokioTcp(socket) })
        }

        #[cfg(not(feature = "tokio"))]
        {
            let _ = (host, port);
            panic!("runtime disabled")
        }
    }

    /// Perform the TLS handshake over a plain tcp socket.
    #[cfg(feature = "tls")]
    pub async fn upgrade_tls(
        self,
        connector: &tokio_rustls::TlsConnector,
        host: &str,
    ) -> io::Result<Socket> {
        let Kind::TokioTcp(tcp) = self.kind else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "socket is not plain tcp"));
        };

        let server_name = rustls::pki_types::ServerName::try_from(host.to_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tls = connector.connect(server_name, tcp).await?;

        crate::common::verbose!(
            alpn = ?tls.get_ref().1.alpn_protocol().map(String::from_utf8_lossy),
            "tls established"
        );

        Ok(Socket { kind: Kind::TokioTls(Box::new(tls)) })
    }

    #[cfg(all(test, feature = "tokio"))]
    pub(crate) fn memory(stream: tokio::io::DuplexStream) -> Socket {
        Socket { kind: Kind::Memory(stream) }
    }
}

macro_rules! delegate {
    ($self:ident, $s:ident => $body:expr) => {
        match &mut $self.kind {
            Kind::TokioTcp($s) => $body,
            #[cfg(feature = "tls")]
            Kind::TokioTls($s) => $body,
            #[cfg(test)]
            Kind::Memory($s) => $body,
        }
    };
}

#[cfg(feature = "tokio")]
impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::pin::Pin;
        delegate!(self, s => Pin::new(s).poll_read(cx, buf))
    }
}

#[cfg(feature = "tokio")]
impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::result::Result<usize, std::io::Error>> {
        use std::pin::Pin;
        delegate!(self, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_write_vectored(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> std::task::Poll<std::result::Result<usize, std::io::Error>> {
        use std::pin::Pin;
        delegate!(self, s => Pin::new(s).poll_write_vectored(cx, bufs))
    }

    fn is_write_vectored(&self) -> bool {
        match &self.kind {
            Kind::TokioTcp(s) => s.is_write_vectored(),
            #[cfg(feature = "tls")]
            Kind::TokioTls(s) => s.is_write_vectored(),
            #[cfg(test)]
            Kind::Memory(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        use std::pin::Pin;
        delegate!(self, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        use std::pin::Pin;
        delegate!(self, s => Pin::new(s).poll_shutdown(cx))
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            #[cfg(feature = "tokio")]
            Kind::TokioTcp(ref tcp) => std::fmt::Debug::fmt(tcp, _f),
            #[cfg(feature = "tls")]
            Kind::TokioTls(ref tls) => std::fmt::Debug::fmt(tls.get_ref().0, _f),
            #[cfg(all(test, feature = "tokio"))]
            Kind::Memory(_) => _f.write_str("Memory"),
        }
    }
}
