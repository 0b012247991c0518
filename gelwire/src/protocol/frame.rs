//! Partial frame reassembly.
use bytes::{Buf, Bytes, BytesMut};

use super::ProtocolError;

// msgtype + length
const HEADER: usize = 1 + 4;

/// One complete message as received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msgtype: u8,
    /// Message body, without the type and length.
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Header,
    Body { msgtype: u8, len: usize },
}

/// Accumulates bytes from the transport until a whole frame is available.
///
/// The header is resolved first, then the body. A frame split across any
/// number of reads decodes exactly like the same frame received whole.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: State,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), state: State::Header }
    }

    /// Append bytes received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Buffer for reading directly from the transport.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Whether any bytes of an incomplete frame are pending.
    pub fn is_pending(&self) -> bool {
        !self.buf.is_empty() || matches!(self.state, State::Body { .. })
    }

    /// Number of bytes missing for the pending frame, at least one.
    pub fn missing(&self) -> usize {
        match self.state {
            State::Header => HEADER.saturating_sub(self.buf.len()).max(1),
            State::Body { len, .. } => len.saturating_sub(self.buf.len()).max(1),
        }
    }

    /// Extract the next complete frame, `None` when more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match self.state {
                State::Header => {
                    if self.buf.len() < HEADER {
                        return Ok(None);
                    }

                    let msgtype = self.buf.get_u8();
                    let len = self.buf.get_u32();
                    if len < 4 {
                        return Err(ProtocolError::InvalidLength(len));
                    }

                    self.state = State::Body { msgtype, len: len as usize - 4 };
                }
                State::Body { msgtype, len } => {
                    if self.buf.len() < len {
                        self.buf.reserve(len - self.buf.len());
                        return Ok(None);
                    }

                    let body = self.buf.split_to(len).freeze();
                    self.state = State::Header;
                    return Ok(Some(Frame { msgtype, body }));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded() -> Vec<u8> {
        let mut buf = vec![b'Z', 0, 0, 0, 7];
        buf.extend_from_slice(&[0, 0, b'I']);
        buf
    }

    #[test]
    fn whole_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded());
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(frame.msgtype, b'Z');
        assert_eq!(&frame.body[..], &[0, 0, b'I']);
        assert!(decoder.decode().unwrap().is_none());
        assert!(!decoder.is_pending());
    }

    #[test]
    fn every_split_point() {
        let bytes = encoded();
        let whole = {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&bytes);
            decoder.decode().unwrap().unwrap()
        };

        for at in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(at);
            let mut decoder = FrameDecoder::new();

            decoder.extend(head);
            let first = decoder.decode().unwrap();
            if at < bytes.len() {
                assert!(first.is_none(), "split at {at} yielded early");
                assert!(decoder.missing() > 0);
            }

            decoder.extend(tail);
            let frame = first.or_else(|| decoder.decode().unwrap()).unwrap();
            assert_eq!(frame, whole, "split at {at}");
            assert!(!decoder.is_pending());
        }
    }

    #[test]
    fn byte_by_byte_with_two_frames() {
        let mut bytes = encoded();
        bytes.extend_from_slice(&[b'H', 0, 0, 0, 4]);

        let mut decoder = FrameDecoder::new();
        let mut frames = vec![];
        for b in bytes {
            decoder.extend(&[b]);
            while let Some(frame) = decoder.decode().unwrap() {
                frames.push(frame.msgtype);
            }
        }
        assert_eq!(frames, [b'Z', b'H']);
    }

    #[test]
    fn length_smaller_than_itself() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[b'Z', 0, 0, 0, 3]);
        assert!(matches!(decoder.decode(), Err(ProtocolError::InvalidLength(3))));
    }
}
