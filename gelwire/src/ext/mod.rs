use bytes::BufMut;
use uuid::Uuid;

use crate::binary::BinaryError;

/// Length is `usize` in rust, while the protocol wants fixed width integers.
pub trait UsizeExt {
    /// Convert to a `u32` length prefix.
    fn to_u32(self) -> Result<u32, BinaryError>;
    /// Convert to a `u16` count prefix.
    fn to_u16(self) -> Result<u16, BinaryError>;
    /// Convert to an `i32` length prefix.
    fn to_i32(self) -> Result<i32, BinaryError>;
}

/// Length prefixed string operation.
pub trait StrExt {
    /// String length plus its `u32` length prefix.
    fn prefixed_len(&self) -> u32;
}

/// Protocol primitives in [`BufMut`].
pub trait BufMutExt {
    /// Write `u32` length then the utf8 bytes.
    fn put_prefixed_str(&mut self, string: &str);
    /// Write `u32` length then the raw bytes.
    fn put_prefixed_bytes(&mut self, bytes: &[u8]);
    /// Write uuid as two big endian halves.
    fn put_uuid(&mut self, uuid: &Uuid);
}

impl UsizeExt for usize {
    fn to_u32(self) -> Result<u32, BinaryError> {
        self.try_into().map_err(|_|BinaryError::TooLarge(self))
    }

    fn to_u16(self) -> Result<u16, BinaryError> {
        self.try_into().map_err(|_|BinaryError::TooLarge(self))
    }

    fn to_i32(self) -> Result<i32, BinaryError> {
        self.try_into().map_err(|_|BinaryError::TooLarge(self))
    }
}

impl StrExt for str {
    fn prefixed_len(&self) -> u32 {
        4 + self.len() as u32
    }
}

impl StrExt for [u8] {
    fn prefixed_len(&self) -> u32 {
        4 + self.len() as u32
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_prefixed_str(&mut self, string: &str) {
        self.put_prefixed_bytes(string.as_bytes());
    }

    fn put_prefixed_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_slice(bytes);
    }

    fn put_uuid(&mut self, uuid: &Uuid) {
        self.put_u128(uuid.as_u128());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uuid_is_big_endian() {
        let mut buf = Vec::<u8>::new();
        buf.put_uuid(&Uuid::from_u128(0x0102));
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[14..], &[1, 2]);
    }
}
