use bytes::Bytes;
use uuid::Uuid;

use super::BinaryError;
use crate::common::ByteStr;

/// Cursor over a received protocol buffer.
///
/// Slices handed out are reference counted views into the same allocation.
#[derive(Debug, Clone, Default)]
pub struct PacketReader {
    buf: Bytes,
    pos: usize,
}

macro_rules! read_int {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, BinaryError> {
            const N: usize = size_of::<$ty>();
            let chunk = self.take(N)?;
            let mut arr = [0u8; N];
            arr.copy_from_slice(chunk);
            Ok(<$ty>::from_be_bytes(arr))
        }
    };
}

impl PacketReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total size of the underlying slice.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, needed: usize) -> Result<&[u8], BinaryError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(BinaryError::Underflow { needed, remaining });
        }
        let start = self.pos;
        self.pos += needed;
        Ok(&self.buf[start..self.pos])
    }

    read_int!(read_u8, u8);
    read_int!(read_i8, i8);
    read_int!(read_u16, u16);
    read_int!(read_i16, i16);
    read_int!(read_u32, u32);
    read_int!(read_i32, i32);
    read_int!(read_u64, u64);
    read_int!(read_i64, i64);
    read_int!(read_f32, f32);
    read_int!(read_f64, f64);

    pub fn read_bool(&mut self) -> Result<bool, BinaryError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, BinaryError> {
        let hi = self.read_u64()?;
        let lo = self.read_u64()?;
        Ok(Uuid::from_u64_pair(hi, lo))
    }

    /// Read `n` bytes without a length prefix.
    pub fn read_raw(&mut self, n: usize) -> Result<Bytes, BinaryError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(BinaryError::Underflow { needed: n, remaining });
        }
        let start = self.pos;
        self.pos += n;
        Ok(self.buf.slice(start..self.pos))
    }

    /// Consume the rest of the buffer.
    pub fn read_rest(&mut self) -> Bytes {
        let start = self.pos;
        self.pos = self.buf.len();
        self.buf.slice(start..)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), BinaryError> {
        self.take(n).map(|_| ())
    }

    /// Read `i32` length then the bytes, a negative length is an absent value.
    pub fn read_bytes(&mut self) -> Result<Option<Bytes>, BinaryError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        self.read_raw(len as usize).map(Some)
    }

    /// Same as [`read_bytes`][PacketReader::read_bytes] where the value is required.
    pub fn read_required_bytes(&mut self) -> Result<Bytes, BinaryError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(BinaryError::NegativeLength(len));
        }
        self.read_raw(len as usize)
    }

    pub fn read_str(&mut self) -> Result<ByteStr, BinaryError> {
        Ok(ByteStr::from_utf8(self.read_required_bytes()?)?)
    }

    /// Split off an independent reader of exactly `n` bytes.
    pub fn scoped(&mut self, n: usize) -> Result<PacketReader, BinaryError> {
        self.read_raw(n).map(PacketReader::new)
    }

    /// Length prefixed [`scoped`][PacketReader::scoped] reader, `None` for absent value.
    pub fn read_scoped(&mut self) -> Result<Option<PacketReader>, BinaryError> {
        Ok(self.read_bytes()?.map(PacketReader::new))
    }

    /// `u16` count of string key value pairs.
    pub fn read_annotations(&mut self) -> Result<Vec<(ByteStr, ByteStr)>, BinaryError> {
        let count = self.read_u16()?;
        let mut annotations = Vec::with_capacity(count as usize);
        for _ in 0..count {
            annotations.push((self.read_str()?, self.read_str()?));
        }
        Ok(annotations)
    }

    /// `u16` count of `u16` keyed byte values.
    pub fn read_attributes(&mut self) -> Result<Vec<(u16, Bytes)>, BinaryError> {
        let count = self.read_u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attributes.push((self.read_u16()?, self.read_required_bytes()?));
        }
        Ok(attributes)
    }

    /// `u32` count of strings.
    pub fn read_string_array(&mut self) -> Result<Vec<ByteStr>, BinaryError> {
        let count = self.read_u32()?;
        let mut strings = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            strings.push(self.read_str()?);
        }
        Ok(strings)
    }
}

impl From<Bytes> for PacketReader {
    fn from(value: Bytes) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::binary::PacketWriter;

    #[test]
    fn mirrors_writer() {
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        let mut w = PacketWriter::new();
        w.write_i16(-2).unwrap();
        w.write_u64(u64::MAX).unwrap();
        w.write_f64(1.5).unwrap();
        w.write_uuid(&id).unwrap();
        w.write_str("gel").unwrap();

        let mut r = PacketReader::new(w.finish().unwrap());
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_f64().unwrap(), 1.5);
        assert_eq!(r.read_uuid().unwrap(), id);
        assert_eq!(r.read_str().unwrap(), "gel");
        assert!(r.is_empty());
        assert_eq!(r.position(), r.size());
    }

    #[test]
    fn absent_and_empty_bytes() {
        let mut r = PacketReader::new(Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]));
        assert_eq!(r.read_bytes().unwrap(), None);
        assert_eq!(r.read_bytes().unwrap(), Some(Bytes::new()));
    }

    #[test]
    fn underflow() {
        let mut r = PacketReader::new(Bytes::from_static(&[0, 1]));
        assert!(matches!(
            r.read_u32(),
            Err(BinaryError::Underflow { needed: 4, remaining: 2 })
        ));
        // failed read does not consume
        assert_eq!(r.read_u16().unwrap(), 1);
    }

    #[test]
    fn scoped_is_independent() {
        let mut r = PacketReader::new(Bytes::from_static(&[0, 1, 0, 2, 9]));
        let mut scope = r.scoped(4).unwrap();
        assert_eq!(scope.read_u16().unwrap(), 1);
        assert_eq!(scope.read_u16().unwrap(), 2);
        assert!(scope.read_u8().is_err());
        assert_eq!(r.read_u8().unwrap(), 9);
    }

    #[test]
    fn annotations_and_attributes() {
        let mut w = PacketWriter::new();
        w.write_u16(1).unwrap();
        w.write_str("k").unwrap();
        w.write_str("v").unwrap();
        w.write_u16(1).unwrap();
        w.write_u16(0x0001).unwrap();
        w.write_bytes(b"hint").unwrap();

        let mut r = PacketReader::new(w.finish().unwrap());
        let ann = r.read_annotations().unwrap();
        assert_eq!(ann[0].0, "k");
        assert_eq!(ann[0].1, "v");
        let attrs = r.read_attributes().unwrap();
        assert_eq!(attrs, vec![(1, Bytes::from_static(b"hint"))]);
    }
}
