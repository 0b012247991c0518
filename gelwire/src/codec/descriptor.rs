//! Type descriptor parsing.
//!
//! Protocol 1.x descriptors start with the type byte and id:
//!
//! ```text
//! ┏━━━━━━┳━━━━━━┳━━━━━━━━━┓
//! ┃ type ┃  id  ┃ payload ┃
//! ┣━━━━━━╋━━━━━━╋━━━━━━━━━┫
//! ┃  u8  ┃ uuid ┃   ...   ┃
//! ┗━━━━━━┻━━━━━━┻━━━━━━━━━┛
//! ```
//!
//! Protocol 2.x prefixes each descriptor with its length, and annotation text
//! descriptors carry no id:
//!
//! ```text
//! ┏━━━━━━━━┳━━━━━━┳━━━━━━┳━━━━━━━━━┓
//! ┃ length ┃ type ┃  id  ┃ payload ┃
//! ┣━━━━━━━━╋━━━━━━╋━━━━━━╋━━━━━━━━━┫
//! ┃  u32   ┃  u8  ┃ uuid ┃   ...   ┃
//! ┗━━━━━━━━┻━━━━━━┻━━━━━━┻━━━━━━━━━┛
//! ```
//!
//! Positions inside payloads index into the list of descriptors parsed so far.
use bytes::Bytes;
use uuid::Uuid;

use super::{CodecError, TypeOperation};
use crate::{
    binary::PacketReader,
    common::{ByteStr, verbose},
    protocol::{Cardinality, ProtocolVersion},
};

/// One parsed type descriptor.
#[derive(Debug)]
pub struct Descriptor {
    /// Nil for annotation text.
    pub id: Uuid,
    /// Schema name, protocol 2.x only.
    pub name: Option<ByteStr>,
    pub kind: DescriptorKind,
}

#[derive(Debug)]
pub enum DescriptorKind {
    Set { element: u16 },
    ObjectShape { elements: Vec<ShapeDescriptor> },
    BaseScalar,
    /// A scalar deriving from a base (1.x) or ancestor list (2.x, nearest first).
    Scalar { base: Option<u16>, ancestors: Vec<u16> },
    Tuple { elements: Vec<u16> },
    NamedTuple { elements: Vec<(ByteStr, u16)> },
    Array { element: u16, dimensions: Vec<i32> },
    Enumeration { members: Vec<ByteStr> },
    InputShape { elements: Vec<ShapeDescriptor> },
    Range { element: u16 },
    MultiRange { element: u16 },
    /// Object type metadata, never produces a codec.
    Object,
    Compound { op: TypeOperation, components: Vec<u16> },
    /// Annotation text, never produces a codec.
    Annotation,
}

#[derive(Debug)]
pub struct ShapeDescriptor {
    pub flags: u32,
    pub cardinality: Option<Cardinality>,
    pub name: ByteStr,
    pub position: u16,
}

impl DescriptorKind {
    /// Whether the descriptor produces a codec.
    pub fn has_codec(&self) -> bool {
        !matches!(self, DescriptorKind::Object | DescriptorKind::Annotation)
    }
}

/// Parse the whole descriptor buffer in the dialect of given protocol.
pub fn parse(version: ProtocolVersion, buf: Bytes) -> Result<Vec<Descriptor>, CodecError> {
    let mut r = PacketReader::new(buf);
    let mut descriptors = vec![];

    while !r.is_empty() {
        let descriptor = if version.major >= 2 {
            let len = r.read_u32()? as usize;
            let mut scope = r.scoped(len)?;
            read_v2(&mut scope)?
        } else {
            read_v1(&mut r)?
        };
        verbose!(id = %descriptor.id, kind = ?descriptor.kind, "type descriptor");
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

fn read_u16_list(r: &mut PacketReader) -> Result<Vec<u16>, CodecError> {
    let count = r.read_u16()?;
    (0..count).map(|_| r.read_u16().map_err(Into::into)).collect()
}

fn read_cardinality(r: &mut PacketReader) -> Result<Option<Cardinality>, CodecError> {
    let byte = r.read_u8()?;
    Cardinality::from_u8(byte)
        .map(Some)
        .ok_or_else(|| CodecError::malformed(format!("unknown cardinality 0x{byte:02x}")))
}

fn read_shape(r: &mut PacketReader, with_source: bool) -> Result<Vec<ShapeDescriptor>, CodecError> {
    let count = r.read_u16()?;
    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let flags = r.read_u32()?;
        let cardinality = read_cardinality(r)?;
        let name = r.read_str()?;
        let position = r.read_u16()?;
        if with_source {
            // source type position
            r.skip(2)?;
        }
        elements.push(ShapeDescriptor { flags, cardinality, name, position });
    }
    Ok(elements)
}

fn read_named(r: &mut PacketReader) -> Result<Vec<(ByteStr, u16)>, CodecError> {
    let count = r.read_u16()?;
    (0..count).map(|_| Ok((r.read_str()?, r.read_u16()?))).collect()
}

fn read_members(r: &mut PacketReader) -> Result<Vec<ByteStr>, CodecError> {
    let count = r.read_u16()?;
    (0..count).map(|_| r.read_str().map_err(Into::into)).collect()
}

fn read_array(r: &mut PacketReader) -> Result<DescriptorKind, CodecError> {
    let element = r.read_u16()?;
    let count = r.read_u16()?;
    let dimensions = (0..count).map(|_| r.read_i32()).collect::<Result<_, _>>()?;
    Ok(DescriptorKind::Array { element, dimensions })
}

fn read_v1(r: &mut PacketReader) -> Result<Descriptor, CodecError> {
    let typ = r.read_u8()?;
    let id = r.read_uuid()?;

    let kind = match typ {
        0 => DescriptorKind::Set { element: r.read_u16()? },
        1 => DescriptorKind::ObjectShape { elements: read_shape(r, false)? },
        2 => DescriptorKind::BaseScalar,
        3 => DescriptorKind::Scalar { base: Some(r.read_u16()?), ancestors: vec![] },
        4 => DescriptorKind::Tuple { elements: read_u16_list(r)? },
        5 => DescriptorKind::NamedTuple { elements: read_named(r)? },
        6 => read_array(r)?,
        7 => DescriptorKind::Enumeration { members: read_members(r)? },
        8 => DescriptorKind::InputShape { elements: read_shape(r, false)? },
        9 => DescriptorKind::Range { element: r.read_u16()? },
        0x80..=0xff => {
            r.read_str()?;
            DescriptorKind::Annotation
        }
        typ => return Err(CodecError::UnknownDescriptor(typ)),
    };

    Ok(Descriptor { id, name: None, kind })
}

fn read_v2(r: &mut PacketReader) -> Result<Descriptor, CodecError> {
    const ANNOTATION_TEXT: u8 = 0x7f;

    let typ = r.read_u8()?;
    if typ == ANNOTATION_TEXT {
        r.read_rest();
        return Ok(Descriptor { id: Uuid::nil(), name: None, kind: DescriptorKind::Annotation });
    }

    let id = r.read_uuid()?;

    // name, schema defined, ancestors
    let meta = |r: &mut PacketReader| -> Result<(ByteStr, Vec<u16>), CodecError> {
        let name = r.read_str()?;
        let _schema_defined = r.read_bool()?;
        Ok((name, read_u16_list(r)?))
    };

    let (name, kind) = match typ {
        0 => (None, DescriptorKind::Set { element: r.read_u16()? }),
        1 => {
            let _ephemeral_free = r.read_bool()?;
            let _type_position = r.read_u16()?;
            (None, DescriptorKind::ObjectShape { elements: read_shape(r, true)? })
        }
        3 => {
            let (name, ancestors) = meta(r)?;
            (Some(name), DescriptorKind::Scalar { base: None, ancestors })
        }
        4 => {
            let (name, _) = meta(r)?;
            (Some(name), DescriptorKind::Tuple { elements: read_u16_list(r)? })
        }
        5 => {
            let (name, _) = meta(r)?;
            (Some(name), DescriptorKind::NamedTuple { elements: read_named(r)? })
        }
        6 => {
            let (name, _) = meta(r)?;
            (Some(name), read_array(r)?)
        }
        7 => {
            let (name, _) = meta(r)?;
            (Some(name), DescriptorKind::Enumeration { members: read_members(r)? })
        }
        8 => (None, DescriptorKind::InputShape { elements: read_shape(r, false)? }),
        9 => {
            let (name, _) = meta(r)?;
            (Some(name), DescriptorKind::Range { element: r.read_u16()? })
        }
        10 => {
            let name = r.read_str()?;
            let _schema_defined = r.read_bool()?;
            (Some(name), DescriptorKind::Object)
        }
        11 => {
            let name = r.read_str()?;
            let _schema_defined = r.read_bool()?;
            let op = TypeOperation::from_u8(r.read_u8()?)?;
            (Some(name), DescriptorKind::Compound { op, components: read_u16_list(r)? })
        }
        12 => {
            let (name, _) = meta(r)?;
            (Some(name), DescriptorKind::MultiRange { element: r.read_u16()? })
        }
        typ => return Err(CodecError::UnknownDescriptor(typ)),
    };

    Ok(Descriptor { id, name, kind })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::binary::PacketWriter;

    const V1: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
    const V2: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };

    #[test]
    fn v1_array_of_scalar() {
        let mut w = PacketWriter::new();
        w.write_u8(2).unwrap();
        w.write_uuid(&Uuid::from_u128(0x105)).unwrap();
        w.write_u8(6).unwrap();
        w.write_uuid(&Uuid::from_u128(7)).unwrap();
        w.write_u16(0).unwrap();
        w.write_u16(1).unwrap();
        w.write_i32(-1).unwrap();
        w.write_u8(0xff).unwrap();
        w.write_uuid(&Uuid::nil()).unwrap();
        w.write_str("note").unwrap();

        let descriptors = parse(V1, w.finish().unwrap()).unwrap();
        assert_eq!(descriptors.len(), 3);
        assert!(matches!(descriptors[0].kind, DescriptorKind::BaseScalar));
        assert!(matches!(
            &descriptors[1].kind,
            DescriptorKind::Array { element: 0, dimensions } if dimensions == &[-1]
        ));
        assert!(!descriptors[2].kind.has_codec());
    }

    #[test]
    fn v2_is_length_scoped() {
        let mut body = PacketWriter::new();
        body.write_u8(3).unwrap();
        body.write_uuid(&Uuid::from_u128(0x101)).unwrap();
        body.write_str("std::str").unwrap();
        body.write_bool(false).unwrap();
        body.write_u16(0).unwrap();
        let body = body.finish().unwrap();

        let mut w = PacketWriter::new();
        w.write_u32(body.len() as u32).unwrap();
        w.write_raw(&body).unwrap();
        // annotation text, skipped by its length
        w.write_u32(5).unwrap();
        w.write_raw(&[0x7f, 0, 0, 9, 9]).unwrap();

        let descriptors = parse(V2, w.finish().unwrap()).unwrap();
        assert_eq!(descriptors[0].name.as_ref().unwrap(), "std::str");
        assert!(matches!(descriptors[1].kind, DescriptorKind::Annotation));
    }

    #[test]
    fn unknown_type() {
        let mut w = PacketWriter::new();
        w.write_u8(0x42).unwrap();
        w.write_uuid(&Uuid::nil()).unwrap();
        assert!(matches!(parse(V1, w.finish().unwrap()), Err(CodecError::UnknownDescriptor(0x42))));
    }
}
