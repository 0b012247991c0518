//! Dynamically typed values.
use bytes::Bytes;
use uuid::Uuid;

use super::{
    numeric::{BigInt, Decimal},
    temporal::{DateDuration, Datetime, Duration, LocalDate, LocalDatetime, LocalTime, RelativeDuration},
};

/// A value that can be sent as an argument or received in a result.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent value.
    Nothing,
    Uuid(Uuid),
    Str(String),
    Bytes(Bytes),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    BigInt(BigInt),
    Bool(bool),
    Datetime(Datetime),
    LocalDatetime(LocalDatetime),
    LocalDate(LocalDate),
    LocalTime(LocalTime),
    Duration(Duration),
    RelativeDuration(RelativeDuration),
    DateDuration(DateDuration),
    /// JSON document text.
    Json(String),
    /// `cfg::memory`, in bytes.
    ConfigMemory(i64),
    Enum(String),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Range(Range),
    MultiRange(Vec<Range>),
    Tuple(Vec<Value>),
    NamedTuple(Vec<(String, Value)>),
    /// Fields in declared order.
    Object(Vec<(String, Value)>),
}

/// A contiguous interval of values.
///
/// A missing bound is infinite.
#[derive(Clone, Debug, PartialEq)]
pub struct Range {
    pub lower: Option<Box<Value>>,
    pub upper: Option<Box<Value>>,
    pub inc_lower: bool,
    pub inc_upper: bool,
    pub empty: bool,
}

impl Range {
    /// Range with given bounds, including lower and excluding upper.
    pub fn new(lower: Option<Value>, upper: Option<Value>) -> Self {
        Self {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            inc_lower: true,
            inc_upper: false,
            empty: false,
        }
    }

    /// The empty range.
    pub fn empty() -> Self {
        Self { lower: None, upper: None, inc_lower: false, inc_upper: false, empty: true }
    }

    pub fn with_inclusive(mut self, inc_lower: bool, inc_upper: bool) -> Self {
        self.inc_lower = inc_lower;
        self.inc_upper = inc_upper;
        self
    }
}

impl Value {
    /// Name of the value variant, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Uuid(_) => "uuid",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Decimal(_) => "decimal",
            Value::BigInt(_) => "bigint",
            Value::Bool(_) => "bool",
            Value::Datetime(_) => "datetime",
            Value::LocalDatetime(_) => "local_datetime",
            Value::LocalDate(_) => "local_date",
            Value::LocalTime(_) => "local_time",
            Value::Duration(_) => "duration",
            Value::RelativeDuration(_) => "relative_duration",
            Value::DateDuration(_) => "date_duration",
            Value::Json(_) => "json",
            Value::ConfigMemory(_) => "cfg::memory",
            Value::Enum(_) => "enum",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::MultiRange(_) => "multirange",
            Value::Tuple(_) => "tuple",
            Value::NamedTuple(_) => "named tuple",
            Value::Object(_) => "object",
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    /// Look up a field of an object or named tuple.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) | Value::NamedTuple(fields) => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

macro_rules! from {
    ($($ty:ty => $variant:ident,)*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

from! {
    Uuid => Uuid,
    String => Str,
    Bytes => Bytes,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    Decimal => Decimal,
    BigInt => BigInt,
    bool => Bool,
    Datetime => Datetime,
    LocalDatetime => LocalDatetime,
    LocalDate => LocalDate,
    LocalTime => LocalTime,
    Duration => Duration,
    RelativeDuration => RelativeDuration,
    DateDuration => DateDuration,
    Range => Range,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nothing, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

#[cfg(feature = "json")]
mod json {
    use super::Value;

    impl From<serde_json::Value> for Value {
        fn from(value: serde_json::Value) -> Self {
            Value::Json(value.to_string())
        }
    }

    impl Value {
        /// Parse a [`Value::Json`] document.
        pub fn to_json(&self) -> Option<serde_json::Result<serde_json::Value>> {
            match self {
                Value::Json(text) => Some(serde_json::from_str(text)),
                _ => None,
            }
        }
    }
}

#[cfg(feature = "serde")]
mod ser {
    use serde::{Serialize, Serializer, ser::SerializeMap};

    use super::Value;

    impl Serialize for Value {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match self {
                Value::Nothing => serializer.serialize_none(),
                Value::Uuid(v) => serializer.collect_str(v),
                Value::Str(v) | Value::Enum(v) | Value::Json(v) => serializer.serialize_str(v),
                Value::Bytes(v) => serializer.serialize_bytes(v),
                Value::Int16(v) => serializer.serialize_i16(*v),
                Value::Int32(v) => serializer.serialize_i32(*v),
                Value::Int64(v) | Value::ConfigMemory(v) => serializer.serialize_i64(*v),
                Value::Float32(v) => serializer.serialize_f32(*v),
                Value::Float64(v) => serializer.serialize_f64(*v),
                Value::Decimal(v) => serializer.collect_str(v),
                Value::BigInt(v) => serializer.collect_str(v),
                Value::Bool(v) => serializer.serialize_bool(*v),
                Value::Datetime(v) => serializer.serialize_i64(v.0),
                Value::LocalDatetime(v) => serializer.serialize_i64(v.0),
                Value::LocalDate(v) => serializer.serialize_i32(v.0),
                Value::LocalTime(v) => serializer.serialize_i64(v.0),
                Value::Duration(v) => serializer.serialize_i64(v.0),
                Value::RelativeDuration(v) => {
                    (v.micros, v.days, v.months).serialize(serializer)
                }
                Value::DateDuration(v) => (v.days, v.months).serialize(serializer),
                Value::Array(v) | Value::Set(v) | Value::Tuple(v) => v.serialize(serializer),
                Value::Range(r) => {
                    let mut map = serializer.serialize_map(Some(5))?;
                    map.serialize_entry("lower", &r.lower)?;
                    map.serialize_entry("upper", &r.upper)?;
                    map.serialize_entry("inc_lower", &r.inc_lower)?;
                    map.serialize_entry("inc_upper", &r.inc_upper)?;
                    map.serialize_entry("empty", &r.empty)?;
                    map.end()
                }
                Value::MultiRange(v) => {
                    let ranges: Vec<_> = v.iter().cloned().map(Value::Range).collect();
                    ranges.serialize(serializer)
                }
                Value::NamedTuple(fields) | Value::Object(fields) => {
                    let mut map = serializer.serialize_map(Some(fields.len()))?;
                    for (name, value) in fields {
                        map.serialize_entry(name, value)?;
                    }
                    map.end()
                }
            }
        }
    }
}
