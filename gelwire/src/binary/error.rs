use std::fmt;

/// An error from reading or writing protocol buffers.
pub enum BinaryError {
    /// Fixed size writer ran out of space.
    Overflow {
        capacity: usize,
        needed: usize,
    },
    /// Writer already handed off its buffer.
    Closed,
    /// Reader does not have enough bytes left.
    Underflow {
        needed: usize,
        remaining: usize,
    },
    /// Length does not fit in the protocol integer width.
    TooLarge(usize),
    /// Length prefix is negative where a value is required.
    NegativeLength(i32),
    /// String field is not valid utf8.
    Utf8(std::str::Utf8Error),
}

impl From<std::str::Utf8Error> for BinaryError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8(value)
    }
}

impl std::error::Error for BinaryError { }

impl fmt::Display for BinaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow { capacity, needed } => write!(
                f,
                "fixed buffer of {capacity} bytes cannot fit {needed} more bytes"
            ),
            Self::Closed => f.write_str("writer already finished"),
            Self::Underflow { needed, remaining } => write!(
                f,
                "buffer underflow, needed {needed} bytes but only {remaining} remaining"
            ),
            Self::TooLarge(len) => write!(f, "length {len} too large for protocol"),
            Self::NegativeLength(len) => write!(f, "unexpected negative length {len}"),
            Self::Utf8(e) => write!(f, "invalid utf8 string: {e}"),
        }
    }
}

impl fmt::Debug for BinaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
