//! The contract between the library front end and a storage backend.
//!
//! A backend persists the provenance graph: sessions, objects, versions,
//! ancestry edges, and properties. Every operation is safe to invoke
//! concurrently from multiple threads; the backend serializes internally.
//! Enumerating operations buffer their whole result set before invoking the
//! caller's callback, so a callback may call back into the backend without
//! deadlocking.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{DependencyType, Direction, Id, SessionId, Version};

/// Flags for [`StorageBackend::get_all_objects`].
pub mod object_flags {
    /// Skip the session join; `ObjectInfo::creation_session` is `None`.
    pub const NO_CREATION_SESSION: u32 = 1 << 0;
    /// Skip the per-row version lookup; `ObjectInfo::version` is `None`.
    pub const NO_VERSION: u32 = 1 << 1;
    /// Cheapest enumeration: both of the above.
    pub const FAST: u32 = NO_CREATION_SESSION | NO_VERSION;
}

/// Flags for [`StorageBackend::get_object_ancestry`].
pub mod ancestry_flags {
    /// Exclude the synthetic previous/next-version edges from a traversal.
    /// Not supported by the relational backend.
    pub const NO_PREV_NEXT_VERSION: u32 = 1 << 0;
    /// Exclude data dependencies from a traversal.
    pub const NO_DATA_DEPENDENCIES: u32 = 1 << 1;
    /// Exclude control dependencies from a traversal.
    pub const NO_CONTROL_DEPENDENCIES: u32 = 1 << 2;
}

/// A session of a provenance-disclosing process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    /// Human-readable MAC address, when the session recorded one.
    pub mac_address: Option<String>,
    pub user: String,
    pub pid: i32,
    pub program: String,
    pub cmdline: String,
    /// Session start, UNIX seconds.
    pub start_time: i64,
}

/// A provenance object together with its creation context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: Id,
    /// Latest version, or `None` when the enumeration skipped the lookup.
    pub version: Option<Version>,
    /// Session that created the object, or `None` when the enumeration
    /// skipped the session join.
    pub creation_session: Option<SessionId>,
    /// Object creation, UNIX seconds.
    pub creation_time: i64,
    pub originator: String,
    pub name: String,
    pub ty: String,
    pub container_id: Option<Id>,
    pub container_version: Option<Version>,
}

/// A single version node of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub id: Id,
    pub version: Version,
    /// Session that created this version.
    pub session: SessionId,
    /// Version creation, UNIX seconds.
    pub creation_time: i64,
}

/// One ancestry edge: data or control flowed from the `from` version node
/// to the `to` version node, making `from` an ancestor of `to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestryEntry {
    pub from_id: Id,
    pub from_version: Version,
    pub to_id: Id,
    pub to_version: Version,
    pub ty: DependencyType,
}

/// One property row of a version node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub id: Id,
    pub version: Version,
    pub key: String,
    pub value: String,
}

/// An object identity paired with its creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTimestamp {
    pub id: Id,
    pub timestamp: i64,
}

/// Callback receiving one enumerated entry. Returning an error stops the
/// enumeration; the error is handed back to the caller unchanged and the
/// remaining buffered rows are discarded.
pub type IdTimestampIter<'a> = &'a mut dyn FnMut(&IdTimestamp) -> Result<()>;
pub type ObjectInfoIter<'a> = &'a mut dyn FnMut(&ObjectInfo) -> Result<()>;
pub type AncestryIter<'a> = &'a mut dyn FnMut(&AncestryEntry) -> Result<()>;
pub type PropertyIter<'a> = &'a mut dyn FnMut(&PropertyEntry) -> Result<()>;

/// A provenance storage backend.
///
/// Enumerating operations return the number of entries delivered to the
/// callback; `Ok(0)` means the query was valid but matched nothing. The two
/// lookup enumerations (`lookup_objects`, `lookup_by_property`) instead
/// report an empty match set as [`CplError::NotFound`].
///
/// [`CplError::NotFound`]: crate::error::CplError::NotFound
pub trait StorageBackend: Send + Sync {
    /// Close the backend, releasing the underlying connections. Failures to
    /// close are logged rather than surfaced. Dropping a backend closes it
    /// best-effort as well.
    fn close(self: Box<Self>) -> Result<()>;

    /// Record a new session. Session identifiers are client-generated and
    /// unique; the initialization time is stamped by the database.
    fn create_session(
        &self,
        session: SessionId,
        mac_address: Option<&str>,
        user: &str,
        pid: i32,
        program: &str,
        cmdline: &str,
    ) -> Result<()>;

    /// Create an object together with its version 0.
    ///
    /// The two inserts are not transactional: a crash in between leaves an
    /// object without versions, which is repaired by re-running the call
    /// with the same client-generated id. An object row that already exists
    /// is reused; a version-0 row that already exists reports
    /// `AlreadyExists`.
    fn create_object(
        &self,
        id: Id,
        originator: &str,
        name: &str,
        ty: &str,
        container: Option<(Id, Version)>,
        session: SessionId,
    ) -> Result<()>;

    /// Look up an object by its `(originator, name, type)` identity. The
    /// identity may collide; the object with the latest creation time wins.
    fn lookup_object(&self, originator: &str, name: &str, ty: &str) -> Result<Id>;

    /// Enumerate every object matching the `(originator, name, type)`
    /// identity together with its creation time. `flags` is reserved and
    /// currently ignored. An empty match set is `NotFound`.
    fn lookup_objects(
        &self,
        originator: &str,
        name: &str,
        ty: &str,
        flags: u32,
        iterator: IdTimestampIter<'_>,
    ) -> Result<usize>;

    /// Create a new version node of an object. A duplicate
    /// `(id, version)` reports `AlreadyExists`: of two writers bumping the
    /// same object concurrently, exactly one wins and the loser retries
    /// with a higher number.
    fn create_version(&self, id: Id, version: Version, session: SessionId) -> Result<()>;

    /// The latest version number of the object.
    fn get_version(&self, id: Id) -> Result<Version>;

    /// Record a data or control dependency between two version nodes.
    fn add_ancestry_edge(
        &self,
        from: (Id, Version),
        to: (Id, Version),
        ty: DependencyType,
    ) -> Result<()>;

    /// Probe whether `query` is an immediate ancestor of `object`: whether
    /// an edge `(from = query, to = object)` exists with
    /// `to_version <= query_max_version` and, when `version_hint` is given,
    /// `from_version <= version_hint`.
    fn has_immediate_ancestor(
        &self,
        object: Id,
        version_hint: Option<Version>,
        query: Id,
        query_max_version: Version,
    ) -> Result<bool>;

    /// Attach a `(key, value)` property to a version node. Properties are
    /// append-only and a key may repeat.
    fn add_property(&self, id: Id, version: Version, key: &str, value: &str) -> Result<()>;

    fn get_session_info(&self, session: SessionId) -> Result<SessionInfo>;

    /// Enumerate every object. Honours [`object_flags`]; without
    /// `NO_VERSION` each row costs a supplementary version lookup.
    fn get_all_objects(&self, flags: u32, iterator: ObjectInfoIter<'_>) -> Result<usize>;

    /// Information about an object. When `version_hint` is absent the
    /// latest version is resolved first, so an object without version rows
    /// reports `NotFound`.
    fn get_object_info(&self, id: Id, version_hint: Option<Version>) -> Result<ObjectInfo>;

    fn get_version_info(&self, id: Id, version: Version) -> Result<VersionInfo>;

    /// Enumerate the edges touching `id` (one hop). `version` restricts
    /// the walk to a single version node; in that case an empty result is
    /// disambiguated into `NotFound` when the object itself is absent.
    /// Honours the two dependency-category [`ancestry_flags`]; any other
    /// flag bit is `NotImplemented`.
    fn get_object_ancestry(
        &self,
        id: Id,
        version: Option<Version>,
        direction: Direction,
        flags: u32,
        iterator: AncestryIter<'_>,
    ) -> Result<usize>;

    /// Enumerate properties of an object, optionally restricted to one
    /// version node and/or one key. The `NotFound` disambiguation of
    /// [`get_object_ancestry`] applies here as well.
    ///
    /// [`get_object_ancestry`]: StorageBackend::get_object_ancestry
    fn get_properties(
        &self,
        id: Id,
        version: Option<Version>,
        key: Option<&str>,
        iterator: PropertyIter<'_>,
    ) -> Result<usize>;

    /// Find every version node carrying the exact `(key, value)` property.
    /// An empty match set is `NotFound`.
    fn lookup_by_property(
        &self,
        key: &str,
        value: &str,
        iterator: PropertyIter<'_>,
    ) -> Result<usize>;
}
