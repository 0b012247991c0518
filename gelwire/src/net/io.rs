use std::{
    io,
    task::{Context, Poll},
};

/// Read once from `reader` into the spare capacity of `buf`.
///
/// Returns `0` only at end of stream, `buf` must have spare capacity.
#[cfg(feature = "tokio")]
pub fn poll_read_buf<R>(reader: &mut R, buf: &mut bytes::BytesMut, cx: &mut Context) -> Poll<io::Result<usize>>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
{
    use std::{pin::Pin, task::ready};
    use bytes::BufMut;
    use tokio::io::ReadBuf;

    if buf.capacity() == buf.len() {
        buf.reserve(1024);
    }

    let n = {
        let dst = buf.chunk_mut();
        let dst = unsafe { dst.as_uninit_slice_mut() };
        let mut read = ReadBuf::uninit(dst);
        let ptr = read.filled().as_ptr();
        ready!(Pin::new(reader).poll_read(cx, &mut read)?);

        // the reader must not swap the buffer
        assert_eq!(ptr, read.filled().as_ptr());
        read.filled().len()
    };

    // Safety: `filled` is exactly the initialized and read part
    unsafe {
        buf.advance_mut(n);
    }

    Poll::Ready(Ok(n))
}

/// Write all of `buf` then flush `writer`.
#[cfg(feature = "tokio")]
pub fn poll_write_buf<W, B>(writer: &mut W, buf: &mut B, cx: &mut Context) -> Poll<io::Result<()>>
where
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
    B: bytes::Buf + ?Sized,
{
    use std::{io::IoSlice, pin::Pin, task::ready};

    const MAX_VECTOR_ELEMENTS: usize = 64;

    while buf.has_remaining() {
        let n = if writer.is_write_vectored() {
            let mut slices = [IoSlice::new(&[]); MAX_VECTOR_ELEMENTS];
            let cnt = buf.chunks_vectored(&mut slices);
            ready!(Pin::new(&mut *writer).poll_write_vectored(cx, &slices[..cnt]))?
        } else {
            ready!(Pin::new(&mut *writer).poll_write(cx, buf.chunk())?)
        };
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
        }
        buf.advance(n);
    }

    Pin::new(writer).poll_flush(cx)
}

#[cfg(not(feature = "tokio"))]
pub fn poll_read_buf<R>(reader: &mut R, buf: &mut bytes::BytesMut, cx: &mut Context) -> Poll<io::Result<usize>> {
    let _ = (reader, buf, cx);
    panic!("runtime disabled")
}

#[cfg(not(feature = "tokio"))]
pub fn poll_write_buf<W, B>(writer: &mut W, buf: &mut B, cx: &mut Context) -> Poll<io::Result<()>> {
    let _ = (writer, buf, cx);
    panic!("runtime disabled")
}
