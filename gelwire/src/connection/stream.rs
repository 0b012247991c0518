use std::{
    io,
    task::{Context, Poll, ready},
};

use bytes::BytesMut;

use crate::{
    Result,
    common::verbose,
    net::{Socket, poll_read_buf, poll_write_buf},
    protocol::{
        BackendProtocol, FrameDecoder, FrontendProtocol, ServerMessage, backend::LogMessage,
        frontend,
    },
    transport::GelTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered connection to the server.
#[derive(Debug)]
pub struct GelStream {
    socket: Socket,
    decoder: FrameDecoder,
    write_buf: BytesMut,
}

impl GelStream {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            decoder: FrameDecoder::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    /// Shut down the write half of the socket.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        #[cfg(feature = "tokio")]
        {
            use tokio::io::AsyncWriteExt;
            self.socket.shutdown().await
        }

        #[cfg(not(feature = "tokio"))]
        {
            panic!("runtime disabled")
        }
    }

    fn poll_read(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        let buf = self.decoder.buffer_mut();
        buf.reserve(DEFAULT_BUF_CAPACITY);
        let n = ready!(poll_read_buf(&mut self.socket, buf, cx))?;
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
        }
        Poll::Ready(Ok(()))
    }
}

fn log_message(message: LogMessage) {
    #[cfg(feature = "log")]
    {
        use crate::protocol::LogSeverity;

        let level = match message.severity {
            LogSeverity::Debug => log::Level::Debug,
            LogSeverity::Info | LogSeverity::Notice => log::Level::Info,
            LogSeverity::Warning => log::Level::Warn,
        };
        log::log!(level, "server: {}: {}", message.code, message.text);
    }

    #[cfg(not(feature = "log"))]
    {
        let _ = message;
    }
}

impl GelTransport for GelStream {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        poll_write_buf(&mut self.socket, &mut self.write_buf, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        if !self.write_buf.is_empty() {
            ready!(self.poll_flush(cx))?;
        }

        loop {
            let Some(frame) = self.decoder.decode()? else {
                ready!(self.poll_read(cx))?;
                continue;
            };

            verbose!(
                msgtype = ServerMessage::message_name(frame.msgtype),
                len = frame.body.len(),
                "frame received"
            );

            if !ServerMessage::is_known(frame.msgtype) {
                #[cfg(feature = "log")]
                log::warn!(
                    "skipping unknown message type {:?} of {} bytes",
                    frame.msgtype as char,
                    frame.body.len()
                );
                continue;
            }

            if frame.msgtype == LogMessage::MSGTYPE {
                log_message(LogMessage::decode(frame.msgtype, frame.body)?);
                continue;
            }

            return Poll::Ready(Ok(B::decode(frame.msgtype, frame.body)?));
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        verbose!(msgtype = ?(F::MSGTYPE as char), "frame sent");
        frontend::write(message, &mut self.write_buf);
    }
}

#[cfg(all(test, feature = "tokio"))]
mod test {
    use bytes::BufMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{
        protocol::{TransactionState, frontend::Sync},
        transport::GelTransportExt,
    };

    #[tokio::test]
    async fn skips_unknown_and_log_messages() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = GelStream::new(Socket::memory(client));

        let mut bytes = BytesMut::new();
        // unknown message type
        bytes.put_u8(b'~');
        bytes.put_u32(4 + 3);
        bytes.put_slice(b"???");
        // log message
        bytes.put_u8(b'L');
        bytes.put_u32(4 + 1 + 4 + 4 + 5 + 2);
        bytes.put_u8(0x50);
        bytes.put_u32(0);
        bytes.put_u32(5);
        bytes.put_slice(b"hello");
        bytes.put_u16(0);
        // ready for command
        bytes.put_slice(&[b'Z', 0, 0, 0, 7, 0, 0, b'I']);

        let writer = tokio::spawn(async move {
            // small chunks to exercise partial frames
            for chunk in bytes.chunks(3) {
                server.write_all(chunk).await.unwrap();
            }
            let mut sync = [0; 5];
            server.read_exact(&mut sync).await.unwrap();
            sync
        });

        stream.send(Sync);
        let message = stream.recv::<ServerMessage>().await.unwrap();
        let ServerMessage::ReadyForCommand(ready) = message else {
            panic!("expected ReadyForCommand");
        };
        assert_eq!(ready.transaction_state, TransactionState::NotInTransaction);
        assert_eq!(writer.await.unwrap(), [b'S', 0, 0, 0, 4]);
    }

    #[tokio::test]
    async fn eof_is_an_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut stream = GelStream::new(Socket::memory(client));
        assert!(stream.recv::<ServerMessage>().await.is_err());
    }
}
