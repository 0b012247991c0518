//! The [`GelTransport`] trait.
use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    Result,
    protocol::{BackendProtocol, FrontendProtocol},
};

/// A buffered stream which can send and receive Gel messages.
pub trait GelTransport: Unpin {
    /// Poll to flush the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive a message.
    ///
    /// Implementor should handle `LogMessage` and should not return it.
    ///
    /// Implementor should also skip messages of unknown type.
    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>>;

    /// Send message to the server.
    ///
    /// Note that this send is buffered, caller must also call
    /// [`poll_flush`][1] or [`flush`][2] afterwards.
    ///
    /// [1]: GelTransport::poll_flush
    /// [2]: GelTransportExt::flush
    fn send<F: FrontendProtocol>(&mut self, message: F);
}

impl<P> GelTransport for &mut P where P: GelTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        P::poll_recv(self, cx)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }
}

/// An extension trait to provide `Future` API for [`GelTransport`].
pub trait GelTransportExt: GelTransport {
    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx|self.poll_flush(cx))
    }

    /// Receive a server message.
    fn recv<B: BackendProtocol>(&mut self) -> impl Future<Output = Result<B>> {
        std::future::poll_fn(|cx|self.poll_recv(cx))
    }
}

impl<T> GelTransportExt for T where T: GelTransport { }
