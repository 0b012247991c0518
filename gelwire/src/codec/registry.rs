//! Codec cache, partitioned by protocol version.
use std::{
    any::{Any, TypeId},
    sync::Arc,
};

use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    BoundObjectCodec, Codec, CodecError, ObjectShape, ObjectType, Scalar, ShapeElement,
    descriptor::{self, Descriptor, DescriptorKind, ShapeDescriptor},
};
use crate::{
    common::{span, verbose},
    protocol::{Capabilities, Cardinality, IoFormat, ProtocolVersion},
};

/// Process scoped owner of all built codecs.
///
/// Cloning is cheap and clones share the same caches. Distinct protocol
/// versions never share codecs since servers may redefine well known ids.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    caches: Arc<DashMap<ProtocolVersion, Arc<CodecCache>>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache of given protocol version, created on first use.
    pub fn cache(&self, version: ProtocolVersion) -> Arc<CodecCache> {
        if let Some(cache) = self.caches.get(&version) {
            return cache.value().clone();
        }
        self.caches
            .entry(version)
            .or_insert_with(|| Arc::new(CodecCache::new()))
            .value()
            .clone()
    }

    /// Build the codec tree described by `descriptors`, returning the root.
    pub fn build(
        &self,
        version: ProtocolVersion,
        root_id: Uuid,
        descriptors: Bytes,
    ) -> Result<Arc<Codec>, CodecError> {
        self.cache(version).build(version, root_id, descriptors)
    }

    pub fn get(&self, version: ProtocolVersion, id: &Uuid) -> Option<Arc<Codec>> {
        self.cache(version).get(id)
    }

    pub fn query_codecs(&self, version: ProtocolVersion, key: u64) -> Option<PreparedCodecs> {
        self.cache(version).query_codecs(key)
    }

    pub fn update_query_codecs(&self, version: ProtocolVersion, key: u64, codecs: QueryCodecs) {
        self.cache(version).update_query_codecs(key, codecs);
    }

    /// Object codec of `shape_id` bound to `T`, compiled once per pair.
    pub fn bind<T: ObjectType>(
        &self,
        version: ProtocolVersion,
        shape_id: &Uuid,
    ) -> Result<Arc<BoundObjectCodec<T>>, CodecError> {
        self.cache(version).bind(shape_id)
    }
}

/// Type ids and result metadata of a previously parsed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCodecs {
    pub input_id: Uuid,
    pub output_id: Uuid,
    pub cardinality: Cardinality,
    pub capabilities: Capabilities,
}

/// [`QueryCodecs`] with both codecs resolved.
#[derive(Debug, Clone)]
pub struct PreparedCodecs {
    pub input_id: Uuid,
    pub input: Arc<Codec>,
    pub output_id: Uuid,
    pub output: Arc<Codec>,
    pub cardinality: Cardinality,
    pub capabilities: Capabilities,
}

/// Codecs of one protocol version.
///
/// Entries are never evicted. Concurrent builders of the same id may both
/// construct a codec, only the first inserted one is retained and returned.
#[derive(Debug)]
pub struct CodecCache {
    codecs: DashMap<Uuid, Arc<Codec>>,
    scalars: DashMap<Scalar, Arc<Codec>>,
    queries: DashMap<u64, QueryCodecs>,
    bindings: DashMap<(Uuid, TypeId), Arc<dyn Any + Send + Sync>>,
}

impl Default for CodecCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecCache {
    pub fn new() -> Self {
        let codecs = DashMap::new();
        codecs.insert(Uuid::nil(), Arc::new(Codec::Null));
        Self {
            codecs,
            scalars: DashMap::new(),
            queries: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    /// Cached codec, falling back to well known scalars.
    pub fn get(&self, id: &Uuid) -> Option<Arc<Codec>> {
        if let Some(codec) = self.codecs.get(id) {
            return Some(codec.value().clone());
        }
        let scalar = Scalar::from_id(id)?;
        let codec = self
            .scalars
            .entry(scalar)
            .or_insert_with(|| Arc::new(Codec::Scalar(scalar)))
            .value()
            .clone();
        Some(codec)
    }

    pub fn build(
        &self,
        version: ProtocolVersion,
        root_id: Uuid,
        buf: Bytes,
    ) -> Result<Arc<Codec>, CodecError> {
        if let Some(codec) = self.get(&root_id) {
            verbose!(%root_id, "codec cache hit");
            return Ok(codec);
        }

        span!("codec_build", %root_id, %version);
        let descriptors = descriptor::parse(version, buf)?;
        let mut built: Vec<Option<Arc<Codec>>> = Vec::with_capacity(descriptors.len());
        let mut root = None;

        for (index, descriptor) in descriptors.iter().enumerate() {
            if !descriptor.kind.has_codec() {
                built.push(None);
                continue;
            }

            let codec = match self.get(&descriptor.id) {
                Some(codec) => codec,
                None => {
                    let codec = construct(index, descriptor, &built)?;
                    verbose!(id = %descriptor.id, codec = %codec.type_name(), "codec built");
                    self.codecs.entry(descriptor.id).or_insert(codec).value().clone()
                }
            };

            built.push(Some(codec.clone()));
            root = Some(codec);
        }

        root.ok_or_else(|| CodecError::malformed("descriptor stream has no root codec"))
    }

    /// Codecs of a cached query, the entry is dropped when either is gone.
    pub fn query_codecs(&self, key: u64) -> Option<PreparedCodecs> {
        let info = *self.queries.get(&key)?;
        match (self.get(&info.input_id), self.get(&info.output_id)) {
            (Some(input), Some(output)) => Some(PreparedCodecs {
                input_id: info.input_id,
                input,
                output_id: info.output_id,
                output,
                cardinality: info.cardinality,
                capabilities: info.capabilities,
            }),
            _ => {
                self.queries.remove(&key);
                None
            }
        }
    }

    pub fn update_query_codecs(&self, key: u64, codecs: QueryCodecs) {
        self.queries.insert(key, codecs);
    }

    pub fn bind<T: ObjectType>(&self, shape_id: &Uuid) -> Result<Arc<BoundObjectCodec<T>>, CodecError> {
        let key = (*shape_id, TypeId::of::<T>());

        let bound = match self.bindings.get(&key) {
            Some(bound) => bound.value().clone(),
            None => {
                let codec = self.get(shape_id).ok_or(CodecError::MissingCodec(*shape_id))?;
                let bound: Arc<dyn Any + Send + Sync> = Arc::new(BoundObjectCodec::<T>::new(&codec)?);
                self.bindings.entry(key).or_insert(bound).value().clone()
            }
        };

        bound.downcast::<BoundObjectCodec<T>>().map_err(|_| CodecError::TypeMapping {
            target: std::any::type_name::<T>(),
            detail: "binding of a different type".into(),
        })
    }
}

fn construct(
    index: usize,
    descriptor: &Descriptor,
    built: &[Option<Arc<Codec>>],
) -> Result<Arc<Codec>, CodecError> {
    let at = |position: u16| -> Result<Arc<Codec>, CodecError> {
        let position = position as usize;
        if position >= index {
            return Err(CodecError::malformed(format!(
                "descriptor {index} references position {position}"
            )));
        }
        built[position].clone().ok_or_else(|| {
            CodecError::malformed(format!("descriptor at position {position} has no codec"))
        })
    };

    let shape = |elements: &[ShapeDescriptor]| -> Result<ObjectShape, CodecError> {
        let elements = elements
            .iter()
            .map(|e| {
                Ok(ShapeElement {
                    name: e.name.clone(),
                    codec: at(e.position)?,
                    cardinality: e.cardinality,
                    flags: e.flags,
                })
            })
            .collect::<Result<_, CodecError>>()?;
        Ok(ObjectShape::new(elements))
    };

    let codec = match &descriptor.kind {
        DescriptorKind::Set { element } => Codec::Set(at(*element)?),
        DescriptorKind::ObjectShape { elements } => Codec::Object(shape(elements)?),
        DescriptorKind::InputShape { elements } => Codec::SparseObject(shape(elements)?),
        DescriptorKind::BaseScalar => match Scalar::from_id(&descriptor.id) {
            Some(scalar) => Codec::Scalar(scalar),
            None => return Err(CodecError::UnknownScalar(descriptor.id)),
        },
        // custom scalars share the codec of their base
        DescriptorKind::Scalar { base: Some(base), .. } => return at(*base),
        DescriptorKind::Scalar { base: None, ancestors } => match ancestors.last() {
            Some(ancestor) => return at(*ancestor),
            None => return Err(CodecError::UnknownScalar(descriptor.id)),
        },
        DescriptorKind::Tuple { elements } => {
            Codec::Tuple(elements.iter().map(|e| at(*e)).collect::<Result<_, _>>()?)
        }
        DescriptorKind::NamedTuple { elements } => Codec::NamedTuple(
            elements
                .iter()
                .map(|(name, e)| Ok((name.clone(), at(*e)?)))
                .collect::<Result<_, CodecError>>()?,
        ),
        DescriptorKind::Array { element, dimensions } => {
            if dimensions.len() != 1 {
                return Err(CodecError::UnsupportedDimensions(dimensions.len() as i32));
            }
            Codec::Array(at(*element)?)
        }
        DescriptorKind::Enumeration { members } => Codec::Enumeration(members.clone()),
        DescriptorKind::Range { element } => Codec::Range(at(*element)?),
        DescriptorKind::MultiRange { element } => Codec::MultiRange(at(*element)?),
        DescriptorKind::Compound { op, components } => Codec::Compound {
            op: *op,
            children: components.iter().map(|e| at(*e)).collect::<Result<_, _>>()?,
        },
        DescriptorKind::Object | DescriptorKind::Annotation => {
            return Err(CodecError::malformed("descriptor produces no codec"));
        }
    };

    Ok(Arc::new(codec))
}

/// Cache key of a query.
///
/// Knuth multiplicative hash of the query text, offset by the expected
/// cardinality and io format bytes.
pub fn query_key(query: &str, cardinality: Cardinality, format: IoFormat) -> u64 {
    let mut hash: u64 = 3074457345618258791;
    for ch in query.chars() {
        hash = hash.wrapping_add(ch as u64);
        hash = hash.wrapping_mul(3074457345618258799);
    }
    hash.wrapping_add(cardinality as u64).wrapping_add(format as u64)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        binary::PacketWriter,
        codec::{FieldDescriptor, ObjectFields, Value},
    };

    const V1: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
    const V2: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };

    const ARRAY_ID: Uuid = Uuid::from_u128(0xa1);

    fn array_of_int32() -> Bytes {
        let mut w = PacketWriter::new();
        w.write_u8(2).unwrap();
        w.write_uuid(&Scalar::Int32.id()).unwrap();
        w.write_u8(6).unwrap();
        w.write_uuid(&ARRAY_ID).unwrap();
        w.write_u16(0).unwrap();
        w.write_u16(1).unwrap();
        w.write_i32(-1).unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn build_is_memoized() {
        let registry = CodecRegistry::new();
        let first = registry.build(V1, ARRAY_ID, array_of_int32()).unwrap();
        assert_eq!(first.type_name(), "array<std::int32>");

        let second = registry.build(V1, ARRAY_ID, array_of_int32()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &registry.get(V1, &ARRAY_ID).unwrap()));

        // other protocol versions are isolated
        assert!(registry.get(V2, &ARRAY_ID).is_none());
    }

    #[test]
    fn concurrent_build_retains_one() {
        let registry = CodecRegistry::new();
        let codecs = std::thread::scope(|s| {
            let handles = (0..8)
                .map(|_| s.spawn(|| registry.build(V1, ARRAY_ID, array_of_int32()).unwrap()))
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        let retained = registry.get(V1, &ARRAY_ID).unwrap();
        assert!(codecs.iter().all(|c| Arc::ptr_eq(c, &retained)));
    }

    #[test]
    fn self_reference_is_malformed() {
        let mut w = PacketWriter::new();
        w.write_u8(0).unwrap();
        w.write_uuid(&Uuid::from_u128(0xb1)).unwrap();
        w.write_u16(0).unwrap();

        let err = CodecRegistry::new()
            .build(V1, Uuid::from_u128(0xb1), w.finish().unwrap())
            .unwrap_err();
        assert!(matches!(err, CodecError::MalformedDescriptor(_)));
    }

    #[test]
    fn annotations_only_is_malformed() {
        let mut w = PacketWriter::new();
        w.write_u8(0xff).unwrap();
        w.write_uuid(&Uuid::from_u128(0xc1)).unwrap();
        w.write_str("doc").unwrap();

        let err = CodecRegistry::new()
            .build(V1, Uuid::from_u128(0xc1), w.finish().unwrap())
            .unwrap_err();
        assert!(matches!(err, CodecError::MalformedDescriptor(_)));
    }

    #[test]
    fn v2_custom_scalar_uses_ancestor() {
        let custom = Uuid::from_u128(0xd1);

        let mut base = PacketWriter::new();
        base.write_u8(3).unwrap();
        base.write_uuid(&Scalar::Int64.id()).unwrap();
        base.write_str("std::int64").unwrap();
        base.write_bool(false).unwrap();
        base.write_u16(0).unwrap();
        let base = base.finish().unwrap();

        let mut derived = PacketWriter::new();
        derived.write_u8(3).unwrap();
        derived.write_uuid(&custom).unwrap();
        derived.write_str("default::seq").unwrap();
        derived.write_bool(true).unwrap();
        derived.write_u16(1).unwrap();
        derived.write_u16(0).unwrap();
        let derived = derived.finish().unwrap();

        let mut w = PacketWriter::new();
        w.write_bytes(&base).unwrap();
        w.write_bytes(&derived).unwrap();

        let codec = CodecRegistry::new().build(V2, custom, w.finish().unwrap()).unwrap();
        assert!(matches!(&*codec, Codec::Scalar(Scalar::Int64)));
    }

    #[test]
    fn stale_query_entry_is_removed() {
        let registry = CodecRegistry::new();
        let key = query_key("select 1", Cardinality::One, IoFormat::Binary);
        let codecs = QueryCodecs {
            input_id: Uuid::nil(),
            output_id: Scalar::Int64.id(),
            cardinality: Cardinality::One,
            capabilities: Capabilities::READ_ONLY,
        };
        registry.update_query_codecs(V1, key, codecs);
        let prepared = registry.query_codecs(V1, key).unwrap();
        assert!(matches!(&*prepared.input, Codec::Null));

        let missing = Uuid::from_u128(0xe1);
        registry.update_query_codecs(V1, key, QueryCodecs { output_id: missing, ..codecs });
        assert!(registry.query_codecs(V1, key).is_none());
        registry.update_query_codecs(V1, key, codecs);
        assert!(registry.query_codecs(V1, key).is_some());
    }

    #[test]
    fn query_key_depends_on_shape() {
        let a = query_key("select 1", Cardinality::One, IoFormat::Binary);
        assert_eq!(a, query_key("select 1", Cardinality::One, IoFormat::Binary));
        assert_ne!(a, query_key("select 1", Cardinality::Many, IoFormat::Binary));
        assert_ne!(a, query_key("select 1", Cardinality::One, IoFormat::Json));
        assert_ne!(a, query_key("select 2", Cardinality::One, IoFormat::Binary));
    }

    struct Named(String);

    impl ObjectType for Named {
        const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::required("name")];

        fn from_fields(mut fields: ObjectFields) -> Result<Self, CodecError> {
            Ok(Named(fields.required_str("name")?))
        }
    }

    #[test]
    fn binding_is_cached_per_type() {
        let shape_id = Uuid::from_u128(0xf1);
        let mut w = PacketWriter::new();
        w.write_u8(2).unwrap();
        w.write_uuid(&Scalar::Str.id()).unwrap();
        w.write_u8(1).unwrap();
        w.write_uuid(&shape_id).unwrap();
        w.write_u16(1).unwrap();
        w.write_u32(0).unwrap();
        w.write_u8(Cardinality::One as u8).unwrap();
        w.write_str("name").unwrap();
        w.write_u16(0).unwrap();

        let registry = CodecRegistry::new();
        registry.build(V1, shape_id, w.finish().unwrap()).unwrap();

        let first = registry.bind::<Named>(V1, &shape_id).unwrap();
        let second = registry.bind::<Named>(V1, &shape_id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let mut payload = PacketWriter::new();
        payload.write_i32(1).unwrap();
        payload.write_i32(0).unwrap();
        payload.write_str("ann").unwrap();
        let named = first.decode(payload.finish().unwrap().into()).unwrap();
        assert_eq!(named.0, "ann");

        let object = registry
            .get(V1, &shape_id)
            .unwrap()
            .decode(&mut crate::binary::PacketReader::new({
                let mut w = PacketWriter::new();
                w.write_i32(1).unwrap();
                w.write_i32(0).unwrap();
                w.write_str("bo").unwrap();
                w.finish().unwrap()
            }))
            .unwrap();
        assert_eq!(object, Value::Object(vec![("name".to_owned(), Value::from("bo"))]));
    }
}
