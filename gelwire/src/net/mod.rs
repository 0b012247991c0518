//! Network primitives.
mod socket;
mod io;

#[cfg(feature = "tls")]
pub mod tls;

pub use socket::Socket;
pub(crate) use io::{poll_read_buf, poll_write_buf};
