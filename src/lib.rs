//! Core Provenance Library: storage backends for disclosed provenance.
//!
//! Applications disclose that artifacts were read, derived, or controlled
//! by other artifacts; this crate persists the resulting graph of versioned
//! objects, data/control dependency edges, and properties, and answers the
//! lookup, ancestry, and property queries later tooling walks it with.
//!
//! The [`backend::StorageBackend`] trait is the contract every backend
//! satisfies; [`relational::RelationalBackend`] is the relational
//! implementation over SQLite.

pub mod backend;
pub mod error;
pub mod logging;
pub mod relational;
pub mod types;

pub use crate::backend::{
    AncestryEntry, IdTimestamp, ObjectInfo, PropertyEntry, SessionInfo, StorageBackend,
    VersionInfo,
};
pub use crate::error::{CplError, Result};
pub use crate::relational::{BackendOptions, DbKind, RelationalBackend};
pub use crate::types::{DependencyCategory, DependencyType, Direction, Id, SessionId, Version};
