//! Identifier and value types shared by every storage backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 128-bit identity of a provenance object or session.
///
/// Identifiers are client-generated and stored as two 64-bit halves, which
/// is also how the relational schema keys its tables (`*_hi` / `*_lo`
/// column pairs). The all-zero value is reserved as the "no object"
/// sentinel.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Id {
    pub hi: u64,
    pub lo: u64,
}

impl Id {
    /// The absent-identity sentinel.
    pub const NONE: Id = Id { hi: 0, lo: 0 };

    pub const fn new(hi: u64, lo: u64) -> Self {
        Id { hi, lo }
    }

    pub const fn from_u128(v: u128) -> Self {
        Id {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }

    pub const fn as_u128(&self) -> u128 {
        ((self.hi as u128) << 64) | self.lo as u128
    }

    pub const fn is_none(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.hi, self.lo)
    }
}

/// Sessions share the identifier representation of objects.
pub type SessionId = Id;

/// Version number of an object; version 0 is created with the object.
/// "No version" is expressed as `Option<Version>` in queries and results.
pub type Version = u32;

/// Direction of an ancestry traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Walk towards the inputs: edges pointing at the given object.
    Ancestors,
    /// Walk towards the consumers: edges leaving the given object.
    Descendants,
}

/// High-level partition of the dependency codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyCategory {
    Data,
    Control,
    Version,
}

/// A dependency-type code: the category in the high byte, the sub-kind
/// within the category in the low byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyType(pub u32);

impl DependencyType {
    pub const NONE: DependencyType = DependencyType(0);

    pub const DATA_INPUT: DependencyType = DependencyType((1 << 8) | 1);
    pub const DATA_IPC: DependencyType = DependencyType((1 << 8) | 2);
    pub const DATA_TRANSLATION: DependencyType = DependencyType((1 << 8) | 3);
    pub const DATA_COPY: DependencyType = DependencyType((1 << 8) | 4);
    pub const DATA_GENERIC: DependencyType = Self::DATA_INPUT;

    pub const CONTROL_OP: DependencyType = DependencyType((2 << 8) | 1);
    pub const CONTROL_START: DependencyType = DependencyType((2 << 8) | 2);
    pub const CONTROL_GENERIC: DependencyType = Self::CONTROL_OP;

    pub const VERSION_PREV: DependencyType = DependencyType((3 << 8) | 1);
    pub const VERSION_GENERIC: DependencyType = Self::VERSION_PREV;

    pub const fn code(self) -> u32 {
        self.0
    }

    /// The category encoded in the high byte, or `None` for codes outside
    /// the known partition.
    pub const fn category(self) -> Option<DependencyCategory> {
        match self.0 >> 8 {
            1 => Some(DependencyCategory::Data),
            2 => Some(DependencyCategory::Control),
            3 => Some(DependencyCategory::Version),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
