//! Array and set codecs.
//!
//! ```text
//! ┏━━━━━━┳━━━━━━━━━━┳━━━━━━━━━━┳━━━━━━━┳━━━━━━━┳━━━━━━━━━━━━━━━━━━━━┓
//! ┃ dims ┃ reserved ┃ reserved ┃ upper ┃ lower ┃ elements           ┃
//! ┣━━━━━━╋━━━━━━━━━━╋━━━━━━━━━━╋━━━━━━━╋━━━━━━━╋━━━━━━━━━━━━━━━━━━━━┫
//! ┃ i32  ┃   i32    ┃   i32    ┃  i32  ┃  i32  ┃ (upper - lower + 1)┃
//! ┗━━━━━━┻━━━━━━━━━━┻━━━━━━━━━━┻━━━━━━━┻━━━━━━━┻━━━━━━━━━━━━━━━━━━━━┛
//! ```
//!
//! An empty array has zero dimensions and stops after the reserved fields.
use std::sync::Arc;

use super::{Codec, CodecError, Value, read_element, write_element};
use crate::{
    binary::{PacketReader, PacketWriter},
    ext::UsizeExt,
};

pub(crate) fn encode_array(
    inner: &Arc<Codec>,
    w: &mut PacketWriter,
    value: &Value,
) -> Result<(), CodecError> {
    let Value::Array(items) = value else {
        return Err(CodecError::mismatch("array", value.kind()));
    };

    if items.is_empty() {
        w.write_i32(0)?;
        w.write_i32(0)?;
        w.write_i32(0)?;
        return Ok(());
    }

    w.write_i32(1)?;
    w.write_i32(0)?;
    w.write_i32(0)?;
    w.write_i32(items.len().to_i32()?)?;
    w.write_i32(1)?;

    for item in items {
        write_element(w, inner, item)?;
    }
    Ok(())
}

/// Read the dimension header, returning the element count.
fn read_header(r: &mut PacketReader) -> Result<usize, CodecError> {
    let dims = r.read_i32()?;
    // flags and reserved
    r.skip(8)?;

    match dims {
        0 => return Ok(0),
        1 => {}
        dims => return Err(CodecError::UnsupportedDimensions(dims)),
    }

    let upper = r.read_i32()?;
    let lower = r.read_i32()?;
    if upper < lower {
        return Err(CodecError::InvalidBounds { lower, upper });
    }

    Ok((upper as i64 - lower as i64 + 1) as usize)
}

pub(crate) fn decode_array(inner: &Codec, r: &mut PacketReader) -> Result<Vec<Value>, CodecError> {
    let count = read_header(r)?;
    let mut items = Vec::with_capacity(count.min(r.remaining() / 4));
    for _ in 0..count {
        items.push(read_element(r, inner)?);
    }
    Ok(items)
}

pub(crate) fn decode_set(inner: &Codec, r: &mut PacketReader) -> Result<Vec<Value>, CodecError> {
    let count = read_header(r)?;
    let mut items = Vec::with_capacity(count.min(r.remaining() / 4));

    for _ in 0..count {
        let item = match inner {
            // sets of arrays wrap each element in a single element envelope
            Codec::Array(_) => {
                let len = r.read_i32()?;
                if len < 0 {
                    items.push(Value::Nothing);
                    continue;
                }
                let mut envelope = r.scoped(len as usize)?;
                let elements = envelope.read_i32()?;
                if elements != 1 {
                    return Err(CodecError::InvalidEnvelope(elements));
                }
                envelope.skip(4)?;
                read_element(&mut envelope, inner)?
            }
            _ => read_element(r, inner)?,
        };
        items.push(item);
    }

    Ok(items)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Scalar;

    fn int32() -> Arc<Codec> {
        Arc::new(Codec::Scalar(Scalar::Int32))
    }

    fn header(w: &mut PacketWriter, upper: i32, lower: i32) {
        w.write_i32(1).unwrap();
        w.write_i32(0).unwrap();
        w.write_i32(0).unwrap();
        w.write_i32(upper).unwrap();
        w.write_i32(lower).unwrap();
    }

    #[test]
    fn array_roundtrip_with_null() {
        let codec = Codec::Array(int32());
        let value = Value::Array(vec![Value::Int32(1), Value::Nothing, Value::Int32(3)]);
        let mut w = PacketWriter::new();
        codec.encode(&mut w, &value).unwrap();
        let mut r = PacketReader::new(w.finish().unwrap());
        assert_eq!(codec.decode(&mut r).unwrap(), value);
        assert!(r.is_empty());
    }

    #[test]
    fn empty_array_has_zero_dimensions() {
        let codec = Codec::Array(int32());
        let mut w = PacketWriter::new();
        codec.encode(&mut w, &Value::Array(vec![])).unwrap();
        let buf = w.finish().unwrap();
        assert_eq!(&buf[..], &[0; 12]);
        assert_eq!(codec.decode(&mut PacketReader::new(buf)).unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn equal_bounds_is_one_element() {
        let mut w = PacketWriter::new();
        header(&mut w, 1, 1);
        w.write_bytes(&7i32.to_be_bytes()).unwrap();
        let mut r = PacketReader::new(w.finish().unwrap());
        assert_eq!(decode_array(&int32(), &mut r).unwrap(), vec![Value::Int32(7)]);
    }

    #[test]
    fn upper_below_lower_is_rejected() {
        let mut w = PacketWriter::new();
        header(&mut w, 0, 1);
        let mut r = PacketReader::new(w.finish().unwrap());
        assert!(matches!(
            decode_array(&int32(), &mut r),
            Err(CodecError::InvalidBounds { lower: 1, upper: 0 })
        ));
    }

    #[test]
    fn multi_dimension_is_rejected() {
        let mut w = PacketWriter::new();
        w.write_i32(2).unwrap();
        w.write_i64(0).unwrap();
        let mut r = PacketReader::new(w.finish().unwrap());
        assert!(matches!(decode_set(&Codec::Scalar(Scalar::Int32), &mut r), Err(CodecError::UnsupportedDimensions(2))));
    }

    #[test]
    fn set_of_arrays_unwraps_envelope() {
        let array = Arc::new(Codec::Array(int32()));
        let set = Codec::Set(array.clone());

        let mut w = PacketWriter::new();
        header(&mut w, 2, 1);
        for n in [10, 20] {
            w.write_with_length::<CodecError, _>(|w| {
                // envelope of one element
                w.write_i32(1)?;
                w.write_i32(0)?;
                w.write_with_length(|w| array.encode(w, &Value::Array(vec![Value::Int32(n)])))
            })
            .unwrap();
        }

        let mut r = PacketReader::new(w.finish().unwrap());
        assert_eq!(
            set.decode(&mut r).unwrap(),
            Value::Set(vec![
                Value::Array(vec![Value::Int32(10)]),
                Value::Array(vec![Value::Int32(20)]),
            ])
        );
    }

    #[test]
    fn envelope_with_two_elements_is_rejected() {
        let set = Codec::Set(Arc::new(Codec::Array(int32())));
        let mut w = PacketWriter::new();
        header(&mut w, 1, 1);
        w.write_with_length::<CodecError, _>(|w| {
            w.write_i32(2)?;
            Ok(())
        })
        .unwrap();
        let mut r = PacketReader::new(w.finish().unwrap());
        assert!(matches!(set.decode(&mut r), Err(CodecError::InvalidEnvelope(2))));
    }

    #[test]
    fn set_of_scalars() {
        let set = Codec::Set(int32());
        let mut w = PacketWriter::new();
        header(&mut w, 2, 1);
        w.write_bytes(&1i32.to_be_bytes()).unwrap();
        w.write_bytes(&2i32.to_be_bytes()).unwrap();
        let mut r = PacketReader::new(w.finish().unwrap());
        assert_eq!(set.decode(&mut r).unwrap(), Value::Set(vec![Value::Int32(1), Value::Int32(2)]));
    }
}
