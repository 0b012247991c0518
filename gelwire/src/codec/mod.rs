//! Dynamic codec system.
//!
//! The server describes the shape of query arguments and results as a stream
//! of type descriptors. [`CodecRegistry::build`] turns that stream into a tree
//! of [`Codec`]s which is then cached per protocol version and shared between
//! connections.
//!
//! Every element nested in a container is framed the same way:
//!
//! ```text
//! ┏━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━━━━━━━━━━━━┓
//! ┃      Length       ┃ Payload                 ┃
//! ┣━━━━━━━━━━━━━━━━━━━╋━━━━━━━━━━━━━━━━━━━━━━━━━┫
//! ┃  i32 (-1 = null)  ┃ decoded by child codec  ┃
//! ┗━━━━━━━━━━━━━━━━━━━┻━━━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```
use std::{borrow::Cow, sync::Arc};

use crate::{
    binary::{PacketReader, PacketWriter},
    common::ByteStr,
};

mod error;
mod value;
mod numeric;
mod temporal;
mod scalar;
mod array;
mod range;
mod object;
mod visitor;
mod enumerator;
pub mod descriptor;
mod registry;

pub use error::CodecError;
pub use value::{Range, Value};
pub use numeric::{BigInt, Decimal};
pub use temporal::{DateDuration, Datetime, Duration, LocalDate, LocalDatetime, LocalTime, RelativeDuration};
pub use scalar::Scalar;
pub use object::{ObjectShape, ShapeElement, TypeOperation};
pub use visitor::TypeVisitor;
pub use enumerator::{BoundObjectCodec, FieldDescriptor, ObjectEnumerator, ObjectField, ObjectFields, ObjectType};
pub use registry::{CodecCache, CodecRegistry, PreparedCodecs, QueryCodecs, query_key};

/// Converts between [`Value`] and wire payload of one type.
///
/// Codecs are immutable once built and own their children.
#[derive(Debug)]
pub enum Codec {
    /// The all zero type id, no data.
    Null,
    Scalar(Scalar),
    Array(Arc<Codec>),
    Set(Arc<Codec>),
    Range(Arc<Codec>),
    MultiRange(Arc<Codec>),
    Tuple(Vec<Arc<Codec>>),
    NamedTuple(Vec<(ByteStr, Arc<Codec>)>),
    /// Output object shape.
    Object(ObjectShape),
    /// Input shape where any subset of elements may be present.
    SparseObject(ObjectShape),
    Enumeration(Vec<ByteStr>),
    Compound {
        op: TypeOperation,
        children: Vec<Arc<Codec>>,
    },
}

impl Codec {
    /// Write the payload of `value`, without the outer length prefix.
    pub fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<(), CodecError> {
        match self {
            Codec::Null => {
                w.write_i32(0)?;
                Ok(())
            }
            Codec::Scalar(scalar) => scalar.encode(w, value),
            Codec::Array(inner) => array::encode_array(inner, w, value),
            Codec::Set(_) => Err(CodecError::invalid("sets cannot be sent as values")),
            Codec::Range(inner) => range::encode_range(inner, w, value),
            Codec::MultiRange(inner) => range::encode_multirange(inner, w, value),
            Codec::Tuple(elements) => object::encode_tuple(elements, w, value),
            Codec::NamedTuple(elements) => object::encode_named_tuple(elements, w, value),
            Codec::Object(shape) => shape.encode(w, value),
            Codec::SparseObject(shape) => shape.encode_sparse(w, value),
            Codec::Enumeration(members) => match value {
                Value::Enum(s) | Value::Str(s) if members.iter().any(|m| m == s.as_str()) => {
                    w.write_raw(s.as_bytes())?;
                    Ok(())
                }
                Value::Enum(s) | Value::Str(s) => {
                    Err(CodecError::invalid(format!("`{s}` is not an enum member")))
                }
                v => Err(CodecError::mismatch("enum", v.kind())),
            },
            Codec::Compound { children, .. } => object::encode_compound(children, w, value),
        }
    }

    /// Read a value from a reader scoped to exactly this payload.
    pub fn decode(&self, r: &mut PacketReader) -> Result<Value, CodecError> {
        match self {
            Codec::Null => Ok(Value::Nothing),
            Codec::Scalar(scalar) => scalar.decode(r),
            Codec::Array(inner) => array::decode_array(inner, r).map(Value::Array),
            Codec::Set(inner) => array::decode_set(inner, r).map(Value::Set),
            Codec::Range(inner) => range::decode_range(inner, r).map(Value::Range),
            Codec::MultiRange(inner) => range::decode_multirange(inner, r).map(Value::MultiRange),
            Codec::Tuple(elements) => object::decode_tuple(elements, r),
            Codec::NamedTuple(elements) => object::decode_named_tuple(elements, r),
            Codec::Object(shape) => ObjectEnumerator::new(std::mem::take(r), shape)?
                .flatten()
                .map(Value::Object),
            Codec::SparseObject(shape) => shape.decode_sparse(r),
            Codec::Enumeration(members) => {
                let text = std::str::from_utf8(&r.read_rest())?.to_owned();
                match members.iter().any(|m| m == text.as_str()) {
                    true => Ok(Value::Enum(text)),
                    false => Err(CodecError::invalid(format!("`{text}` is not an enum member"))),
                }
            }
            Codec::Compound { children, .. } => object::decode_compound(children, r),
        }
    }

    /// Write the arguments payload of a query.
    ///
    /// Unlike [`encode`][Codec::encode], the null codec writes nothing.
    pub fn encode_arguments(&self, w: &mut PacketWriter, args: &Value) -> Result<(), CodecError> {
        match (self, args) {
            (Codec::Null, Value::Nothing) => Ok(()),
            (Codec::Null, Value::Object(fields) | Value::NamedTuple(fields)) if fields.is_empty() => {
                Ok(())
            }
            (Codec::Null, Value::Tuple(items)) if items.is_empty() => Ok(()),
            (Codec::Null, Value::Object(fields) | Value::NamedTuple(fields)) => {
                Err(CodecError::UnknownArgument(fields[0].0.clone()))
            }
            (Codec::Null, v) => Err(CodecError::mismatch("no arguments", v.kind())),
            (codec, args) => codec.encode(w, args),
        }
    }

    /// Schema level name of the type this codec handles.
    pub fn type_name(&self) -> Cow<'static, str> {
        fn join(children: &[Arc<Codec>], sep: &str) -> String {
            children.iter().map(|c| c.type_name()).collect::<Vec<_>>().join(sep)
        }

        match self {
            Codec::Null => "null".into(),
            Codec::Scalar(scalar) => scalar.name().into(),
            Codec::Array(inner) => format!("array<{}>", inner.type_name()).into(),
            Codec::Set(inner) => format!("set<{}>", inner.type_name()).into(),
            Codec::Range(inner) => format!("range<{}>", inner.type_name()).into(),
            Codec::MultiRange(inner) => format!("multirange<{}>", inner.type_name()).into(),
            Codec::Tuple(elements) => format!("tuple<{}>", join(elements, ", ")).into(),
            Codec::NamedTuple(elements) => {
                let inner = elements
                    .iter()
                    .map(|(name, c)| format!("{name}: {}", c.type_name()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("tuple<{inner}>").into()
            }
            Codec::Object(_) => "object".into(),
            Codec::SparseObject(_) => "input shape".into(),
            Codec::Enumeration(_) => "enum".into(),
            Codec::Compound { op: TypeOperation::Union, children } => join(children, " | ").into(),
            Codec::Compound { op: TypeOperation::Intersection, children } => {
                join(children, " & ").into()
            }
        }
    }

    /// Object shape of an object codec.
    pub fn shape(&self) -> Option<&ObjectShape> {
        match self {
            Codec::Object(shape) | Codec::SparseObject(shape) => Some(shape),
            _ => None,
        }
    }
}

/// Write an element of a container, `-1` for [`Value::Nothing`].
pub(crate) fn write_element(
    w: &mut PacketWriter,
    codec: &Arc<Codec>,
    value: &Value,
) -> Result<(), CodecError> {
    if value.is_nothing() {
        w.write_null()?;
        return Ok(());
    }
    let codec = TypeVisitor::visit(codec, value)?;
    w.write_with_length(|w| codec.encode(w, value))
}

/// Read a length prefixed element of a container.
pub(crate) fn read_element(r: &mut PacketReader, codec: &Codec) -> Result<Value, CodecError> {
    match r.read_scoped()? {
        Some(mut scope) => codec.decode(&mut scope),
        None => Ok(Value::Nothing),
    }
}
