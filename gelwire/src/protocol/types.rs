//! Enumerations and bitsets shared by frontend and backend messages.
use std::fmt;

/// Binary protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const V1_0: ProtocolVersion = ProtocolVersion::new(1, 0);
    pub const V2_0: ProtocolVersion = ProtocolVersion::new(2, 0);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

macro_rules! byte_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)*
        }

        impl $name {
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

byte_enum! {
    /// Declared multiplicity of a result or an object element.
    pub enum Cardinality {
        NoResult = 0x6e,
        AtMostOne = 0x6f,
        One = 0x41,
        Many = 0x6d,
        AtLeastOne = 0x4d,
    }
}

byte_enum! {
    /// Requested result encoding.
    pub enum IoFormat {
        Binary = 0x62,
        Json = 0x6a,
        JsonElements = 0x4a,
        None = 0x6e,
    }
}

byte_enum! {
    /// Transaction status reported by `ReadyForCommand`.
    pub enum TransactionState {
        NotInTransaction = 0x49,
        InTransaction = 0x54,
        InFailedTransaction = 0x45,
    }
}

byte_enum! {
    pub enum ErrorSeverity {
        Error = 0x78,
        Fatal = 0xc8,
        Panic = 0xff,
    }
}

byte_enum! {
    pub enum LogSeverity {
        Debug = 0x14,
        Info = 0x28,
        Notice = 0x3c,
        Warning = 0x50,
    }
}

macro_rules! flags {
    (
        $(#[$meta:meta])*
        pub struct $name:ident { $($(#[$fmeta:meta])* const $flag:ident = $value:expr;)* }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u64);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name($value);)*

            pub const fn from_bits(bits: u64) -> Self {
                Self(bits)
            }

            pub const fn bits(&self) -> u64 {
                self.0
            }

            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

flags! {
    /// Kinds of operations a query is permitted to perform.
    pub struct Capabilities {
        const READ_ONLY = 0;
        const MODIFICATIONS = 1 << 0;
        const SESSION_CONFIG = 1 << 1;
        const TRANSACTION = 1 << 2;
        const DDL = 1 << 3;
        const PERSISTENT_CONFIG = 1 << 4;
        const ALL = u64::MAX;
    }
}

flags! {
    pub struct CompilationFlags {
        const NONE = 0;
        const INJECT_OUTPUT_TYPE_IDS = 1 << 0;
        const INJECT_OUTPUT_TYPE_NAMES = 1 << 1;
        const INJECT_OUTPUT_OBJECT_IDS = 1 << 2;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn byte_enums() {
        assert_eq!(Cardinality::from_u8(0x41), Some(Cardinality::One));
        assert_eq!(Cardinality::from_u8(0x00), None);
        assert_eq!(TransactionState::from_u8(b'T'), Some(TransactionState::InTransaction));
        assert_eq!(IoFormat::Binary as u8, b'b');
    }

    #[test]
    fn capability_bits() {
        let caps = Capabilities::MODIFICATIONS | Capabilities::DDL;
        assert_eq!(caps.bits(), 0b1001);
        assert!(caps.contains(Capabilities::DDL));
        assert!(!caps.contains(Capabilities::TRANSACTION));
        assert!(Capabilities::ALL.contains(caps));
        assert_eq!(ProtocolVersion::V1_0.to_string(), "1.0");
    }
}
