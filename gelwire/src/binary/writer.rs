use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::BinaryError;
use crate::ext::UsizeExt;

const DEFAULT_CAPACITY: usize = 512;
const SLACK: usize = 512;
const LARGE: usize = 2048;

/// Integer width of a count prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    U16,
    U32,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Dynamic,
    Fixed(usize),
}

/// Growable, single use protocol buffer writer.
///
/// Once [`finish`][PacketWriter::finish] hands the buffer off, every
/// subsequent write returns [`BinaryError::Closed`].
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
    mode: Mode,
    closed: bool,
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketWriter {
    /// Create dynamic writer with default capacity hint.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create dynamic writer with given capacity hint.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), mode: Mode::Dynamic, closed: false }
    }

    /// Create writer that fails instead of growing past `capacity`.
    pub fn fixed(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), mode: Mode::Fixed(capacity), closed: false }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Hand off the written buffer and close the writer.
    pub fn finish(&mut self) -> Result<Bytes, BinaryError> {
        if self.closed {
            return Err(BinaryError::Closed);
        }
        self.closed = true;
        Ok(self.buf.split().freeze())
    }

    fn ensure(&mut self, needed: usize) -> Result<(), BinaryError> {
        if self.closed {
            return Err(BinaryError::Closed);
        }

        let pos = self.buf.len();
        let cap = match self.mode {
            Mode::Fixed(cap) => cap,
            Mode::Dynamic => self.buf.capacity(),
        };

        if cap - pos >= needed {
            return Ok(());
        }

        match self.mode {
            Mode::Fixed(capacity) => Err(BinaryError::Overflow { capacity, needed }),
            Mode::Dynamic => {
                let target = if needed + pos > LARGE {
                    cap + needed + SLACK
                } else if cap > LARGE {
                    cap + LARGE
                } else {
                    (cap << 1) + needed
                };
                self.buf.reserve(target - pos);
                Ok(())
            }
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), BinaryError> {
        self.ensure(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn write_i8(&mut self, value: i8) -> Result<(), BinaryError> {
        self.ensure(1)?;
        self.buf.put_i8(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), BinaryError> {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), BinaryError> {
        self.ensure(2)?;
        self.buf.put_u16(value);
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), BinaryError> {
        self.ensure(2)?;
        self.buf.put_i16(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), BinaryError> {
        self.ensure(4)?;
        self.buf.put_u32(value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), BinaryError> {
        self.ensure(4)?;
        self.buf.put_i32(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), BinaryError> {
        self.ensure(8)?;
        self.buf.put_u64(value);
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), BinaryError> {
        self.ensure(8)?;
        self.buf.put_i64(value);
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), BinaryError> {
        self.ensure(4)?;
        self.buf.put_f32(value);
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), BinaryError> {
        self.ensure(8)?;
        self.buf.put_f64(value);
        Ok(())
    }

    /// Write uuid as two big endian 64 bit halves.
    pub fn write_uuid(&mut self, value: &Uuid) -> Result<(), BinaryError> {
        let (hi, lo) = value.as_u64_pair();
        self.write_u64(hi)?;
        self.write_u64(lo)
    }

    /// Write bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), BinaryError> {
        self.ensure(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Write `u32` length then the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BinaryError> {
        self.ensure(4 + bytes.len())?;
        self.buf.put_u32(bytes.len().to_u32()?);
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Write `u32` length then the utf8 string.
    pub fn write_str(&mut self, string: &str) -> Result<(), BinaryError> {
        self.write_bytes(string.as_bytes())
    }

    /// Write the `-1` length which marks an absent value.
    pub fn write_null(&mut self) -> Result<(), BinaryError> {
        self.write_i32(-1)
    }

    /// Write the union of `flags` as a `u64` bitset.
    pub fn write_flags(&mut self, flags: &[u64]) -> Result<(), BinaryError> {
        self.write_u64(flags.iter().fold(0, |acc, f| acc | f))
    }

    /// Write count prefix of given `width`, then each item via `f`.
    pub fn write_array<T, E, F>(&mut self, width: Width, items: &[T], mut f: F) -> Result<(), E>
    where
        F: FnMut(&mut Self, &T) -> Result<(), E>,
        E: From<BinaryError>,
    {
        match width {
            Width::U16 => self.write_u16(items.len().to_u16()?)?,
            Width::U32 => self.write_u32(items.len().to_u32()?)?,
        }
        for item in items {
            f(self, item)?;
        }
        Ok(())
    }

    /// Reserve a 4 byte length slot, run `f`, then patch the slot with the
    /// number of bytes `f` emitted.
    pub fn write_with_length<E, F>(&mut self, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Self) -> Result<(), E>,
        E: From<BinaryError>,
    {
        self.ensure(4)?;
        let offset = self.buf.len();
        self.buf.put_i32(0);

        f(self)?;

        let written = (self.buf.len() - offset - 4).to_i32()?;
        self.buf[offset..offset + 4].copy_from_slice(&written.to_be_bytes());
        Ok(())
    }
}
