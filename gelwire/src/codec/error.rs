use std::{borrow::Cow, fmt};

use uuid::Uuid;

use crate::binary::BinaryError;

/// An error from building codecs or converting values through them.
pub enum CodecError {
    /// Buffer level failure.
    Binary(BinaryError),
    /// Descriptor stream is not well formed.
    MalformedDescriptor(Cow<'static, str>),
    /// Descriptor type byte is not known.
    UnknownDescriptor(u8),
    /// Base scalar id is not a well known scalar.
    UnknownScalar(Uuid),
    /// No codec cached for the given id.
    MissingCodec(Uuid),
    /// Element count on the wire differs from the codec arity.
    ArityMismatch {
        expected: usize,
        found: i32,
    },
    /// Array dimension with upper bound below the lower bound.
    InvalidBounds {
        lower: i32,
        upper: i32,
    },
    /// Only single dimension arrays and sets are supported.
    UnsupportedDimensions(i32),
    /// Set of arrays element envelope does not hold exactly one element.
    InvalidEnvelope(i32),
    /// Required argument was not supplied.
    MissingArgument(String),
    /// Supplied argument is not part of the input shape.
    UnknownArgument(String),
    /// Sparse object index out of range.
    InvalidIndex {
        index: i32,
        count: usize,
    },
    /// Value kind does not match the declared codec.
    TypeMismatch {
        expected: Cow<'static, str>,
        found: &'static str,
    },
    /// Decoded object cannot be mapped into the target type.
    TypeMapping {
        target: &'static str,
        detail: Cow<'static, str>,
    },
    /// Payload is structurally valid but its content is not.
    InvalidValue(Cow<'static, str>),
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::MalformedDescriptor(reason.into())
    }

    pub(crate) fn invalid(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidValue(reason.into())
    }

    pub(crate) fn mismatch(expected: impl Into<Cow<'static, str>>, found: &'static str) -> Self {
        Self::TypeMismatch { expected: expected.into(), found }
    }
}

impl From<BinaryError> for CodecError {
    fn from(value: BinaryError) -> Self {
        Self::Binary(value)
    }
}

impl From<std::str::Utf8Error> for CodecError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Binary(value.into())
    }
}

impl std::error::Error for CodecError { }

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(e) => e.fmt(f),
            Self::MalformedDescriptor(r) => write!(f, "malformed type descriptor: {r}"),
            Self::UnknownDescriptor(t) => write!(f, "unknown type descriptor 0x{t:02x}"),
            Self::UnknownScalar(id) => write!(f, "unknown base scalar {id}"),
            Self::MissingCodec(id) => write!(f, "no codec found for type {id}"),
            Self::ArityMismatch { expected, found } => {
                write!(f, "expected {expected} elements, but got {found}")
            }
            Self::InvalidBounds { lower, upper } => {
                write!(f, "invalid array bounds, upper {upper} below lower {lower}")
            }
            Self::UnsupportedDimensions(d) => {
                write!(f, "only one dimension is supported, got {d}")
            }
            Self::InvalidEnvelope(n) => {
                write!(f, "envelope should contain only one element, but contains {n}")
            }
            Self::MissingArgument(name) => write!(f, "missing required argument `{name}`"),
            Self::UnknownArgument(name) => write!(f, "argument `{name}` is not part of the query"),
            Self::InvalidIndex { index, count } => {
                write!(f, "element index {index} out of range for {count} elements")
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch, expected {expected}, found {found}")
            }
            Self::TypeMapping { target, detail } => {
                write!(f, "failed to deserialize object to {target}: {detail}")
            }
            Self::InvalidValue(r) => write!(f, "invalid value: {r}"),
        }
    }
}

impl fmt::Debug for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
