use std::sync::Arc;

use super::{Codec, CodecError, Scalar, Value};

/// Resolves the concrete codec for a runtime value.
///
/// Compound codecs resolve to the first child accepting the value, every
/// other codec resolves to itself once the value kind is checked.
pub struct TypeVisitor;

impl TypeVisitor {
    pub fn visit(declared: &Arc<Codec>, value: &Value) -> Result<Arc<Codec>, CodecError> {
        if value.is_nothing() {
            return Ok(declared.clone());
        }

        let accepted = match (&**declared, value) {
            (Codec::Compound { children, .. }, value) => {
                return children
                    .iter()
                    .find_map(|child| Self::visit(child, value).ok())
                    .ok_or_else(|| CodecError::mismatch(declared.type_name(), value.kind()));
            }
            (Codec::Scalar(scalar), value) => accepts(*scalar, value),
            (Codec::Array(_), Value::Array(_)) => true,
            (Codec::Set(_), Value::Set(_) | Value::Array(_)) => true,
            (Codec::Range(_), Value::Range(_)) => true,
            (Codec::MultiRange(_), Value::MultiRange(_)) => true,
            (Codec::Enumeration(_), Value::Enum(_) | Value::Str(_)) => true,
            (Codec::Object(_) | Codec::SparseObject(_), Value::Object(_) | Value::NamedTuple(_)) => true,
            (Codec::Tuple(_), Value::Tuple(_)) => true,
            (Codec::NamedTuple(_), Value::NamedTuple(_) | Value::Object(_)) => true,
            _ => false,
        };

        match accepted {
            true => Ok(declared.clone()),
            false => Err(CodecError::mismatch(declared.type_name(), value.kind())),
        }
    }
}

fn accepts(scalar: Scalar, value: &Value) -> bool {
    matches!(
        (scalar, value),
        (Scalar::Uuid, Value::Uuid(_))
            | (Scalar::Str, Value::Str(_))
            | (Scalar::Bytes, Value::Bytes(_))
            | (Scalar::Int16, Value::Int16(_))
            | (Scalar::Int32, Value::Int32(_))
            | (Scalar::Int64, Value::Int64(_))
            | (Scalar::Float32, Value::Float32(_))
            | (Scalar::Float64, Value::Float64(_))
            | (Scalar::Decimal, Value::Decimal(_))
            | (Scalar::Bool, Value::Bool(_))
            | (Scalar::Datetime, Value::Datetime(_))
            | (Scalar::LocalDatetime, Value::LocalDatetime(_))
            | (Scalar::LocalDate, Value::LocalDate(_))
            | (Scalar::LocalTime, Value::LocalTime(_))
            | (Scalar::Duration, Value::Duration(_))
            | (Scalar::Json, Value::Json(_))
            | (Scalar::BigInt, Value::BigInt(_))
            | (Scalar::RelativeDuration, Value::RelativeDuration(_))
            | (Scalar::DateDuration, Value::DateDuration(_))
            | (Scalar::ConfigMemory, Value::ConfigMemory(_))
    )
}
