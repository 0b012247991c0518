//! Range and multirange codecs.
use std::sync::Arc;

use super::{Codec, CodecError, Range, Value, TypeVisitor};
use crate::{
    binary::{PacketReader, PacketWriter},
    ext::UsizeExt,
};

const EMPTY: u8 = 0x01;
const INC_LOWER: u8 = 0x02;
const INC_UPPER: u8 = 0x04;
const INF_LOWER: u8 = 0x08;
const INF_UPPER: u8 = 0x10;

fn write_range(inner: &Arc<Codec>, w: &mut PacketWriter, range: &Range) -> Result<(), CodecError> {
    let flags = if range.empty {
        EMPTY
    } else {
        let mut flags = 0;
        if range.inc_lower {
            flags |= INC_LOWER;
        }
        if range.inc_upper {
            flags |= INC_UPPER;
        }
        if range.lower.is_none() {
            flags |= INF_LOWER;
        }
        if range.upper.is_none() {
            flags |= INF_UPPER;
        }
        flags
    };

    w.write_u8(flags)?;
    if range.empty {
        return Ok(());
    }

    for bound in [&range.lower, &range.upper].into_iter().flatten() {
        let codec = TypeVisitor::visit(inner, bound)?;
        w.write_with_length(|w| codec.encode(w, bound))?;
    }
    Ok(())
}

pub(crate) fn encode_range(inner: &Arc<Codec>, w: &mut PacketWriter, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Range(range) => write_range(inner, w, range),
        v => Err(CodecError::mismatch("range", v.kind())),
    }
}

pub(crate) fn encode_multirange(
    inner: &Arc<Codec>,
    w: &mut PacketWriter,
    value: &Value,
) -> Result<(), CodecError> {
    let Value::MultiRange(ranges) = value else {
        return Err(CodecError::mismatch("multirange", value.kind()));
    };
    w.write_i32(ranges.len().to_i32()?)?;
    for range in ranges {
        w.write_with_length(|w| write_range(inner, w, range))?;
    }
    Ok(())
}

pub(crate) fn decode_range(inner: &Codec, r: &mut PacketReader) -> Result<Range, CodecError> {
    let flags = r.read_u8()?;
    if flags & EMPTY != 0 {
        return Ok(Range::empty());
    }

    let mut bound = |infinite: u8| -> Result<Option<Box<Value>>, CodecError> {
        if flags & infinite != 0 {
            return Ok(None);
        }
        let mut scope = PacketReader::new(r.read_required_bytes()?);
        Ok(Some(Box::new(inner.decode(&mut scope)?)))
    };

    let lower = bound(INF_LOWER)?;
    let upper = bound(INF_UPPER)?;

    Ok(Range {
        lower,
        upper,
        inc_lower: flags & INC_LOWER != 0,
        inc_upper: flags & INC_UPPER != 0,
        empty: false,
    })
}

pub(crate) fn decode_multirange(inner: &Codec, r: &mut PacketReader) -> Result<Vec<Range>, CodecError> {
    let count = r.read_i32()?.max(0) as usize;
    let mut ranges = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        let mut scope = PacketReader::new(r.read_required_bytes()?);
        ranges.push(decode_range(inner, &mut scope)?);
    }
    Ok(ranges)
}
