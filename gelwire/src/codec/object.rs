//! Object, tuple and compound codecs.
//!
//! All of them share the element framing:
//!
//! ```text
//! ┏━━━━━━━┳━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┓
//! ┃ count ┃ count × (reserved i32, length i32, payload)  ┃
//! ┗━━━━━━━┻━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```
//!
//! Sparse objects replace the reserved field with the element index.
use std::sync::Arc;

use super::{Codec, CodecError, ObjectEnumerator, TypeVisitor, Value, read_element, write_element};
use crate::{
    binary::{PacketReader, PacketWriter},
    common::ByteStr,
    ext::UsizeExt,
    protocol::Cardinality,
};

/// Set operation of a compound type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeOperation {
    Union,
    Intersection,
}

impl TypeOperation {
    pub(crate) fn from_u8(op: u8) -> Result<Self, CodecError> {
        match op {
            1 => Ok(Self::Union),
            2 => Ok(Self::Intersection),
            op => Err(CodecError::malformed(format!("unknown type operation {op}"))),
        }
    }
}

/// One element of an object shape.
#[derive(Debug)]
pub struct ShapeElement {
    pub name: ByteStr,
    pub codec: Arc<Codec>,
    pub cardinality: Option<Cardinality>,
    pub flags: u32,
}

impl ShapeElement {
    /// Whether the element may be left out of the arguments.
    pub fn is_optional(&self) -> bool {
        matches!(self.cardinality, Some(Cardinality::AtMostOne | Cardinality::Many))
    }
}

/// Ordered elements of an object codec.
#[derive(Debug)]
pub struct ObjectShape {
    elements: Vec<ShapeElement>,
}

impl ObjectShape {
    pub fn new(elements: Vec<ShapeElement>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[ShapeElement] {
        &self.elements
    }

    /// Index of the element with given name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name == name)
    }

    /// Write every element in declared order, looked up by name in `value`.
    pub(crate) fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<(), CodecError> {
        let (Value::Object(fields) | Value::NamedTuple(fields)) = value else {
            return Err(CodecError::mismatch("object", value.kind()));
        };

        w.write_i32(self.elements.len().to_i32()?)?;

        for element in &self.elements {
            // reserved
            w.write_i32(0)?;

            let value = fields
                .iter()
                .find(|(name, _)| element.name == name.as_str())
                .map(|(_, value)| value)
                .filter(|value| !value.is_nothing());

            match value {
                Some(value) => write_element(w, &element.codec, value)?,
                None if element.is_optional() => w.write_null()?,
                None => return Err(CodecError::MissingArgument(element.name.to_string())),
            }
        }

        Ok(())
    }

    /// Write only the supplied fields, each prefixed with its element index.
    pub(crate) fn encode_sparse(&self, w: &mut PacketWriter, value: &Value) -> Result<(), CodecError> {
        let (Value::Object(fields) | Value::NamedTuple(fields)) = value else {
            return Err(CodecError::mismatch("object", value.kind()));
        };

        let mut indexed = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let Some(index) = self.position(name) else {
                return Err(CodecError::UnknownArgument(name.clone()));
            };
            indexed.push((index, value));
        }

        w.write_i32(indexed.len().to_i32()?)?;
        for (index, value) in indexed {
            w.write_i32(index.to_i32()?)?;
            write_element(w, &self.elements[index].codec, value)?;
        }
        Ok(())
    }

    pub(crate) fn decode_sparse(&self, r: &mut PacketReader) -> Result<Value, CodecError> {
        let count = r.read_i32()?;
        if count < 0 || count as usize > self.elements.len() {
            return Err(CodecError::ArityMismatch { expected: self.elements.len(), found: count });
        }

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let index = r.read_i32()?;
            let element = usize::try_from(index)
                .ok()
                .and_then(|i| self.elements.get(i))
                .ok_or(CodecError::InvalidIndex { index, count: self.elements.len() })?;
            fields.push((element.name.to_string(), read_element(r, &element.codec)?));
        }
        Ok(Value::Object(fields))
    }

    /// Decode into a generic object value.
    pub fn decode_object(&self, r: PacketReader) -> Result<Vec<(String, Value)>, CodecError> {
        ObjectEnumerator::new(r, self)?.flatten()
    }
}

fn read_count(r: &mut PacketReader, expected: usize) -> Result<(), CodecError> {
    let found = r.read_i32()?;
    if found < 0 || found as usize != expected {
        return Err(CodecError::ArityMismatch { expected, found });
    }
    Ok(())
}

pub(crate) fn encode_tuple(
    elements: &[Arc<Codec>],
    w: &mut PacketWriter,
    value: &Value,
) -> Result<(), CodecError> {
    let Value::Tuple(items) = value else {
        return Err(CodecError::mismatch("tuple", value.kind()));
    };
    if items.len() != elements.len() {
        return Err(CodecError::ArityMismatch {
            expected: elements.len(),
            found: items.len().to_i32()?,
        });
    }

    w.write_i32(items.len().to_i32()?)?;
    for (codec, item) in elements.iter().zip(items) {
        w.write_i32(0)?;
        write_element(w, codec, item)?;
    }
    Ok(())
}

pub(crate) fn decode_tuple(elements: &[Arc<Codec>], r: &mut PacketReader) -> Result<Value, CodecError> {
    read_count(r, elements.len())?;
    let mut items = Vec::with_capacity(elements.len());
    for codec in elements {
        r.skip(4)?;
        items.push(read_element(r, codec)?);
    }
    Ok(Value::Tuple(items))
}

pub(crate) fn encode_named_tuple(
    elements: &[(ByteStr, Arc<Codec>)],
    w: &mut PacketWriter,
    value: &Value,
) -> Result<(), CodecError> {
    let (Value::NamedTuple(fields) | Value::Object(fields)) = value else {
        return Err(CodecError::mismatch("named tuple", value.kind()));
    };

    if let Some((name, _)) = fields.iter().find(|(n, _)| !elements.iter().any(|(e, _)| e == n.as_str())) {
        return Err(CodecError::UnknownArgument(name.clone()));
    }

    w.write_i32(elements.len().to_i32()?)?;
    for (name, codec) in elements {
        let Some((_, item)) = fields.iter().find(|(n, _)| name == n.as_str()) else {
            return Err(CodecError::MissingArgument(name.to_string()));
        };
        w.write_i32(0)?;
        write_element(w, codec, item)?;
    }
    Ok(())
}

pub(crate) fn decode_named_tuple(
    elements: &[(ByteStr, Arc<Codec>)],
    r: &mut PacketReader,
) -> Result<Value, CodecError> {
    read_count(r, elements.len())?;
    let mut fields = Vec::with_capacity(elements.len());
    for (name, codec) in elements {
        r.skip(4)?;
        fields.push((name.to_string(), read_element(r, codec)?));
    }
    Ok(Value::NamedTuple(fields))
}

pub(crate) fn encode_compound(
    children: &[Arc<Codec>],
    w: &mut PacketWriter,
    value: &Value,
) -> Result<(), CodecError> {
    let (Value::Tuple(items) | Value::Array(items)) = value else {
        return Err(CodecError::mismatch("compound", value.kind()));
    };
    if items.len() != children.len() {
        return Err(CodecError::ArityMismatch {
            expected: children.len(),
            found: items.len().to_i32()?,
        });
    }

    w.write_i32(items.len().to_i32()?)?;
    for (child, item) in children.iter().zip(items) {
        w.write_i32(0)?;
        if item.is_nothing() {
            w.write_null()?;
            continue;
        }
        let codec = TypeVisitor::visit(child, item)?;
        w.write_with_length(|w| codec.encode(w, item))?;
    }
    Ok(())
}

pub(crate) fn decode_compound(children: &[Arc<Codec>], r: &mut PacketReader) -> Result<Value, CodecError> {
    read_count(r, children.len())?;
    let mut items = Vec::with_capacity(children.len());
    for child in children {
        r.skip(4)?;
        items.push(read_element(r, child)?);
    }
    Ok(Value::Tuple(items))
}
