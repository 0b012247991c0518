//! Object decoding, generic and type bound.
use std::{
    borrow::Cow,
    marker::PhantomData,
    sync::{Arc, Weak},
};

use super::{Codec, CodecError, ObjectShape, ShapeElement, Value, read_element};
use crate::binary::PacketReader;

/// Lazily decodes the elements of an object payload in declared order.
pub struct ObjectEnumerator<'a> {
    reader: PacketReader,
    elements: &'a [ShapeElement],
    index: usize,
}

/// One decoded object element.
#[derive(Debug)]
pub struct ObjectField<'a> {
    pub name: &'a str,
    pub value: Value,
    /// Declared type of the element.
    pub type_name: Cow<'static, str>,
}

impl<'a> ObjectEnumerator<'a> {
    pub fn new(mut reader: PacketReader, shape: &'a ObjectShape) -> Result<Self, CodecError> {
        let elements = shape.elements();
        let found = reader.read_i32()?;
        if found < 0 || found as usize != elements.len() {
            return Err(CodecError::ArityMismatch { expected: elements.len(), found });
        }
        Ok(Self { reader, elements, index: 0 })
    }

    pub fn has_remaining(&self) -> bool {
        self.index < self.elements.len()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<ObjectField<'a>>, CodecError> {
        let Some(element) = self.elements.get(self.index) else {
            return Ok(None);
        };
        self.index += 1;

        // reserved
        self.reader.skip(4)?;
        let value = read_element(&mut self.reader, &element.codec)?;

        Ok(Some(ObjectField {
            name: element.name.as_str(),
            value,
            type_name: element.codec.type_name(),
        }))
    }

    /// Decode the remaining elements into name value pairs.
    pub fn flatten(mut self) -> Result<Vec<(String, Value)>, CodecError> {
        let mut fields = Vec::with_capacity(self.elements.len() - self.index);
        while let Some(field) = self.next()? {
            fields.push((field.name.to_owned(), field.value));
        }
        Ok(fields)
    }
}

/// Field of a type that objects can be decoded into.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Binding fails when the shape lacks a required field.
    pub required: bool,
}

impl FieldDescriptor {
    pub const fn required(name: &'static str) -> Self {
        Self { name, required: true }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self { name, required: false }
    }
}

/// A type constructed from a decoded object.
///
/// # Example
///
/// ```
/// use gelwire::codec::{CodecError, FieldDescriptor, ObjectFields, ObjectType};
///
/// struct User {
///     name: String,
///     age: Option<i32>,
/// }
///
/// impl ObjectType for User {
///     const FIELDS: &'static [FieldDescriptor] = &[
///         FieldDescriptor::required("name"),
///         FieldDescriptor::optional("age"),
///     ];
///
///     fn from_fields(mut fields: ObjectFields) -> Result<Self, CodecError> {
///         Ok(User {
///             name: fields.required_str("name")?,
///             age: fields.take_as("age", |v| match v {
///                 gelwire::codec::Value::Int32(n) => Some(n),
///                 _ => None,
///             })?,
///         })
///     }
/// }
/// ```
pub trait ObjectType: Sized + 'static {
    const FIELDS: &'static [FieldDescriptor];

    fn from_fields(fields: ObjectFields) -> Result<Self, CodecError>;
}

/// Decoded values of [`ObjectType::FIELDS`], in the same order.
#[derive(Debug)]
pub struct ObjectFields {
    target: &'static str,
    descriptors: &'static [FieldDescriptor],
    values: Vec<Option<Value>>,
}

impl ObjectFields {
    fn slot(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.name == name)
    }

    fn mapping(&self, detail: impl Into<Cow<'static, str>>) -> CodecError {
        CodecError::TypeMapping { target: self.target, detail: detail.into() }
    }

    /// Take the value of a field, absent values are `None`.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        let slot = self.slot(name)?;
        self.values[slot].take().filter(|v| !v.is_nothing())
    }

    /// Take the value of a field that must be present.
    pub fn required(&mut self, name: &str) -> Result<Value, CodecError> {
        self.take(name)
            .ok_or_else(|| self.mapping(format!("field `{name}` is missing")))
    }

    /// Take a required string field.
    pub fn required_str(&mut self, name: &str) -> Result<String, CodecError> {
        match self.required(name)? {
            Value::Str(s) => Ok(s),
            v => Err(self.mapping(format!("field `{name}` expected str, found {}", v.kind()))),
        }
    }

    /// Take an optional field converted with `f`, a failed conversion is an error.
    pub fn take_as<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(Value) -> Option<T>,
    ) -> Result<Option<T>, CodecError> {
        let Some(value) = self.take(name) else {
            return Ok(None);
        };
        let kind = value.kind();
        f(value)
            .map(Some)
            .ok_or_else(|| self.mapping(format!("field `{name}` cannot be converted from {kind}")))
    }
}

/// Object codec bound to a rust type.
///
/// Holds a weak reference back to the shape codec, the registry owns both.
#[derive(Debug)]
pub struct BoundObjectCodec<T> {
    shape: Weak<Codec>,
    /// Element index to field slot.
    slots: Vec<Option<usize>>,
    _p: PhantomData<fn() -> T>,
}

impl<T: ObjectType> BoundObjectCodec<T> {
    pub fn new(codec: &Arc<Codec>) -> Result<Self, CodecError> {
        let target = std::any::type_name::<T>();
        let Codec::Object(shape) = &**codec else {
            return Err(CodecError::TypeMapping {
                target,
                detail: format!("{} is not an object", codec.type_name()).into(),
            });
        };

        for field in T::FIELDS.iter().filter(|f| f.required) {
            if shape.position(field.name).is_none() {
                return Err(CodecError::TypeMapping {
                    target,
                    detail: format!("field `{}` is not part of the result", field.name).into(),
                });
            }
        }

        let slots = shape
            .elements()
            .iter()
            .map(|e| T::FIELDS.iter().position(|f| e.name == f.name))
            .collect();

        Ok(Self { shape: Arc::downgrade(codec), slots, _p: PhantomData })
    }

    /// Decode an object payload into `T`.
    pub fn decode(&self, reader: PacketReader) -> Result<T, CodecError> {
        let target = std::any::type_name::<T>();
        let Some(codec) = self.shape.upgrade() else {
            return Err(CodecError::TypeMapping { target, detail: "object codec was dropped".into() });
        };
        let Some(shape) = codec.shape() else {
            return Err(CodecError::TypeMapping { target, detail: "codec is not an object".into() });
        };

        let mut values = vec![None; T::FIELDS.len()];
        let mut enumerator = ObjectEnumerator::new(reader, shape)?;
        let mut index = 0;
        while let Some(field) = enumerator.next()? {
            if let Some(Some(slot)) = self.slots.get(index) {
                values[*slot] = Some(field.value);
            }
            index += 1;
        }

        T::from_fields(ObjectFields { target, descriptors: T::FIELDS, values })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        binary::PacketWriter,
        codec::{Scalar, ShapeElement},
        protocol::Cardinality,
    };

    #[derive(Debug)]
    struct User {
        name: String,
        age: Option<i32>,
    }

    impl ObjectType for User {
        const FIELDS: &'static [FieldDescriptor] = &[
            FieldDescriptor::required("name"),
            FieldDescriptor::optional("age"),
        ];

        fn from_fields(mut fields: ObjectFields) -> Result<Self, CodecError> {
            Ok(User {
                name: fields.required_str("name")?,
                age: fields.take_as("age", |v| match v {
                    Value::Int32(n) => Some(n),
                    _ => None,
                })?,
            })
        }
    }

    fn shape(names: &[(&'static str, Scalar)]) -> Arc<Codec> {
        let elements = names
            .iter()
            .map(|(name, s)| ShapeElement {
                name: (*name).into(),
                codec: Arc::new(Codec::Scalar(*s)),
                cardinality: Some(Cardinality::One),
                flags: 0,
            })
            .collect();
        Arc::new(Codec::Object(ObjectShape::new(elements)))
    }

    fn payload() -> PacketReader {
        let mut w = PacketWriter::new();
        w.write_i32(3).unwrap();
        w.write_i32(0).unwrap();
        w.write_bytes(&[0; 16]).unwrap();
        w.write_i32(0).unwrap();
        w.write_str("ann").unwrap();
        w.write_i32(0).unwrap();
        w.write_null().unwrap();
        PacketReader::new(w.finish().unwrap())
    }

    #[test]
    fn enumerates_in_declared_order() {
        let codec = shape(&[("id", Scalar::Uuid), ("name", Scalar::Str), ("age", Scalar::Int32)]);
        let mut e = ObjectEnumerator::new(payload(), codec.shape().unwrap()).unwrap();

        let first = e.next().unwrap().unwrap();
        assert_eq!(first.name, "id");
        assert_eq!(first.type_name, "std::uuid");
        assert!(e.has_remaining());

        let rest = e.flatten().unwrap();
        assert_eq!(rest, vec![
            ("name".to_owned(), Value::from("ann")),
            ("age".to_owned(), Value::Nothing),
        ]);
    }

    #[test]
    fn bound_codec_maps_fields() {
        let codec = shape(&[("id", Scalar::Uuid), ("name", Scalar::Str), ("age", Scalar::Int32)]);
        let bound = BoundObjectCodec::<User>::new(&codec).unwrap();
        let user = bound.decode(payload()).unwrap();
        assert_eq!(user.name, "ann");
        assert_eq!(user.age, None);
    }

    #[test]
    fn missing_required_field() {
        let codec = shape(&[("id", Scalar::Uuid)]);
        let err = BoundObjectCodec::<User>::new(&codec).unwrap_err();
        assert!(matches!(err, CodecError::TypeMapping { .. }));
    }

    #[test]
    fn dropped_shape() {
        let codec = shape(&[("id", Scalar::Uuid), ("name", Scalar::Str), ("age", Scalar::Int32)]);
        let bound = BoundObjectCodec::<User>::new(&codec).unwrap();
        drop(codec);
        assert!(bound.decode(payload()).is_err());
    }
}
