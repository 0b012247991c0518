//! Well known scalar codecs.
use std::str;

use uuid::Uuid;

use super::{
    CodecError, Value,
    numeric::{BigInt, Decimal},
    temporal::{DateDuration, Datetime, Duration, LocalDate, LocalDatetime, LocalTime, RelativeDuration},
};
use crate::binary::{PacketReader, PacketWriter};

const JSON_FORMAT: u8 = 0x01;

/// Scalar types with a server assigned, fixed id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Uuid,
    Str,
    Bytes,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    Bool,
    Datetime,
    LocalDatetime,
    LocalDate,
    LocalTime,
    Duration,
    Json,
    BigInt,
    RelativeDuration,
    DateDuration,
    ConfigMemory,
}

macro_rules! scalars {
    ($($variant:ident = $id:literal, $name:literal;)*) => {
        impl Scalar {
            /// Well known scalar of given type id.
            pub fn from_id(id: &Uuid) -> Option<Scalar> {
                match id.as_u128() {
                    $($id => Some(Scalar::$variant),)*
                    _ => None,
                }
            }

            /// Fixed type id of the scalar.
            pub fn id(&self) -> Uuid {
                match self {
                    $(Scalar::$variant => Uuid::from_u128($id),)*
                }
            }

            /// Fully qualified schema name.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Scalar::$variant => $name,)*
                }
            }
        }
    };
}

scalars! {
    Uuid = 0x100, "std::uuid";
    Str = 0x101, "std::str";
    Bytes = 0x102, "std::bytes";
    Int16 = 0x103, "std::int16";
    Int32 = 0x104, "std::int32";
    Int64 = 0x105, "std::int64";
    Float32 = 0x106, "std::float32";
    Float64 = 0x107, "std::float64";
    Decimal = 0x108, "std::decimal";
    Bool = 0x109, "std::bool";
    Datetime = 0x10a, "std::datetime";
    LocalDatetime = 0x10b, "cal::local_datetime";
    LocalDate = 0x10c, "cal::local_date";
    LocalTime = 0x10d, "cal::local_time";
    Duration = 0x10e, "std::duration";
    Json = 0x10f, "std::json";
    BigInt = 0x110, "std::bigint";
    RelativeDuration = 0x111, "cal::relative_duration";
    DateDuration = 0x112, "cal::date_duration";
    ConfigMemory = 0x130, "cfg::memory";
}

impl Scalar {
    pub(crate) fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<(), CodecError> {
        match (self, value) {
            (Scalar::Uuid, Value::Uuid(v)) => w.write_uuid(v)?,
            (Scalar::Str, Value::Str(v)) => w.write_raw(v.as_bytes())?,
            (Scalar::Bytes, Value::Bytes(v)) => w.write_raw(v)?,
            (Scalar::Int16, Value::Int16(v)) => w.write_i16(*v)?,
            (Scalar::Int32, Value::Int32(v)) => w.write_i32(*v)?,
            (Scalar::Int64, Value::Int64(v)) => w.write_i64(*v)?,
            (Scalar::Float32, Value::Float32(v)) => w.write_f32(*v)?,
            (Scalar::Float64, Value::Float64(v)) => w.write_f64(*v)?,
            (Scalar::Decimal, Value::Decimal(v)) => v.encode(w)?,
            (Scalar::Bool, Value::Bool(v)) => w.write_bool(*v)?,
            (Scalar::Datetime, Value::Datetime(v)) => w.write_i64(v.0)?,
            (Scalar::LocalDatetime, Value::LocalDatetime(v)) => w.write_i64(v.0)?,
            (Scalar::LocalDate, Value::LocalDate(v)) => w.write_i32(v.0)?,
            (Scalar::LocalTime, Value::LocalTime(v)) => w.write_i64(v.0)?,
            (Scalar::Duration, Value::Duration(v)) => v.encode(w)?,
            (Scalar::Json, Value::Json(v)) => {
                w.write_u8(JSON_FORMAT)?;
                w.write_raw(v.as_bytes())?;
            }
            (Scalar::BigInt, Value::BigInt(v)) => v.encode(w)?,
            (Scalar::RelativeDuration, Value::RelativeDuration(v)) => v.encode(w)?,
            (Scalar::DateDuration, Value::DateDuration(v)) => v.encode(w)?,
            (Scalar::ConfigMemory, Value::ConfigMemory(v)) => w.write_i64(*v)?,
            (scalar, value) => return Err(CodecError::mismatch(scalar.name(), value.kind())),
        }
        Ok(())
    }

    pub(crate) fn decode(&self, r: &mut PacketReader) -> Result<Value, CodecError> {
        let value = match self {
            Scalar::Uuid => Value::Uuid(r.read_uuid()?),
            Scalar::Str => Value::Str(str::from_utf8(&r.read_rest())?.to_owned()),
            Scalar::Bytes => Value::Bytes(r.read_rest()),
            Scalar::Int16 => Value::Int16(r.read_i16()?),
            Scalar::Int32 => Value::Int32(r.read_i32()?),
            Scalar::Int64 => Value::Int64(r.read_i64()?),
            Scalar::Float32 => Value::Float32(r.read_f32()?),
            Scalar::Float64 => Value::Float64(r.read_f64()?),
            Scalar::Decimal => Value::Decimal(Decimal::decode(r)?),
            Scalar::Bool => Value::Bool(r.read_bool()?),
            Scalar::Datetime => Value::Datetime(Datetime(r.read_i64()?)),
            Scalar::LocalDatetime => Value::LocalDatetime(LocalDatetime(r.read_i64()?)),
            Scalar::LocalDate => Value::LocalDate(LocalDate(r.read_i32()?)),
            Scalar::LocalTime => Value::LocalTime(LocalTime(r.read_i64()?)),
            Scalar::Duration => Value::Duration(Duration::decode(r)?),
            Scalar::Json => {
                if r.is_empty() {
                    return Ok(Value::Nothing);
                }
                let format = r.read_u8()?;
                if format != JSON_FORMAT {
                    return Err(CodecError::invalid(format!("unsupported json format {format}")));
                }
                if r.is_empty() {
                    return Ok(Value::Nothing);
                }
                Value::Json(str::from_utf8(&r.read_rest())?.to_owned())
            }
            Scalar::BigInt => Value::BigInt(BigInt::decode(r)?),
            Scalar::RelativeDuration => Value::RelativeDuration(RelativeDuration::decode(r)?),
            Scalar::DateDuration => Value::DateDuration(DateDuration::decode(r)?),
            Scalar::ConfigMemory => Value::ConfigMemory(r.read_i64()?),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;

    fn roundtrip(scalar: Scalar, value: Value) {
        let mut w = PacketWriter::new();
        scalar.encode(&mut w, &value).unwrap();
        let mut r = PacketReader::new(w.finish().unwrap());
        assert_eq!(scalar.decode(&mut r).unwrap(), value);
        assert!(r.is_empty());
    }

    #[test]
    fn scalar_roundtrips() {
        roundtrip(Scalar::Int16, Value::Int16(-7));
        roundtrip(Scalar::Int64, Value::Int64(i64::MIN));
        roundtrip(Scalar::Float64, Value::Float64(0.25));
        roundtrip(Scalar::Str, Value::Str("héllo".into()));
        roundtrip(Scalar::Bytes, Value::Bytes(Bytes::from_static(b"\x00\x01")));
        roundtrip(Scalar::Bool, Value::Bool(true));
        roundtrip(Scalar::Uuid, Value::Uuid(Uuid::from_u128(42)));
        roundtrip(Scalar::LocalDate, Value::LocalDate(LocalDate(-1)));
        roundtrip(Scalar::Json, Value::Json("{\"a\":1}".into()));
        roundtrip(Scalar::Decimal, Value::Decimal("123.4500".parse().unwrap()));
        roundtrip(Scalar::BigInt, Value::BigInt("98765432109876543210".parse().unwrap()));
        roundtrip(Scalar::ConfigMemory, Value::ConfigMemory(1024));
        roundtrip(
            Scalar::DateDuration,
            Value::DateDuration(DateDuration { days: 3, months: 1 }),
        );
    }

    #[test]
    fn well_known_ids() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-000000000101").unwrap();
        assert_eq!(Scalar::from_id(&id), Some(Scalar::Str));
        assert_eq!(Scalar::ConfigMemory.id().as_u128(), 0x130);
        assert_eq!(Scalar::from_id(&Uuid::nil()), None);
    }

    #[test]
    fn json_format_byte() {
        let mut w = PacketWriter::new();
        Scalar::Json.encode(&mut w, &Value::Json("1".into())).unwrap();
        assert_eq!(&w.finish().unwrap()[..], &[1, b'1']);

        let mut empty = PacketReader::default();
        assert_eq!(Scalar::Json.decode(&mut empty).unwrap(), Value::Nothing);

        let mut tag_only = PacketReader::new(Bytes::from_static(&[1]));
        assert_eq!(Scalar::Json.decode(&mut tag_only).unwrap(), Value::Nothing);

        let mut text = PacketReader::new(Bytes::from_static(&[1, b'{', b'}']));
        assert_eq!(Scalar::Json.decode(&mut text).unwrap(), Value::Json("{}".into()));

        let mut other = PacketReader::new(Bytes::from_static(&[2, b'1']));
        assert!(Scalar::Json.decode(&mut other).is_err());
    }

    #[test]
    fn mismatched_value() {
        let mut w = PacketWriter::new();
        let err = Scalar::Int32.encode(&mut w, &Value::Str("1".into())).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { found: "str", .. }));
    }
}
