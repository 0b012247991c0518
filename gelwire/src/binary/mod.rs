//! Binary buffer primitives.
//!
//! Every multi byte field on the wire is big endian. Variable sized fields are
//! prefixed with their length:
//!
//! ```text
//! ┏━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃       Length      ┃ Data ┃
//! ┣━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃        i32        ┃ [u8] ┃
//! ┗━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! A length of `-1` marks an absent (null) value, which is distinct from an
//! empty one.
mod error;
mod reader;
mod writer;

pub use error::BinaryError;
pub use reader::PacketReader;
pub use writer::{PacketWriter, Width};
