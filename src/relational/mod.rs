//! Relational storage backend.
//!
//! The provenance graph lives in five `cpl_*` tables keyed by 128-bit
//! identifiers split into high/low column pairs. Each statement family owns
//! one engine connection guarded by one mutex; a lock is held only while a
//! statement is bound, executed, and its cursor drained into a buffer, and
//! is released before any caller-supplied callback runs, so callbacks may
//! re-enter the backend freely.
//!
//! The locking is deliberately coarse: the shared resource is one prepared
//! statement set per family. A pool of identical prepared statements would
//! admit more concurrency with the same externally observable behavior.

mod connection;
mod row;
mod schema;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::params;
use tracing::{info, warn};

use crate::backend::{
    ancestry_flags, object_flags, AncestryEntry, AncestryIter, IdTimestamp, IdTimestampIter,
    ObjectInfo, ObjectInfoIter, PropertyEntry, PropertyIter, SessionInfo, StorageBackend,
    VersionInfo,
};
use crate::error::{CplError, Result};
use crate::types::{DependencyCategory, DependencyType, Direction, Id, SessionId, Version};

pub use connection::{BackendOptions, DbKind};

use connection::{ConnectionSettings, OnConflict, OpConnection};
use row::NullPolicy;

/// Provenance storage over a relational database.
///
/// One mutex-guarded connection per statement family; operations on
/// different families proceed concurrently, operations within a family
/// serialize. No operation holds two family locks at once.
pub struct RelationalBackend {
    kind: DbKind,
    create_session: Mutex<OpConnection>,
    create_object: Mutex<OpConnection>,
    lookup_object: Mutex<OpConnection>,
    lookup_objects: Mutex<OpConnection>,
    create_version: Mutex<OpConnection>,
    get_version: Mutex<OpConnection>,
    add_ancestry_edge: Mutex<OpConnection>,
    has_immediate_ancestor: Mutex<OpConnection>,
    add_property: Mutex<OpConnection>,
    get_session_info: Mutex<OpConnection>,
    get_all_objects: Mutex<OpConnection>,
    get_object_info: Mutex<OpConnection>,
    get_version_info: Mutex<OpConnection>,
    get_object_ancestry: Mutex<OpConnection>,
    get_properties: Mutex<OpConnection>,
    lookup_by_property: Mutex<OpConnection>,
}

impl RelationalBackend {
    /// Open a backend from a `KEY=VALUE;` connection string (see
    /// [`BackendOptions`] and the `DSN`/`MODE`/`TIMEOUT` keys).
    pub fn open(connection_string: &str, kind: DbKind) -> Result<Self> {
        Self::open_with_options(connection_string, kind, BackendOptions::default())
    }

    /// Convenience constructor from a bare data source name. The name may
    /// not contain `;`, `{`, or `}`.
    pub fn open_dsn(dsn: &str, kind: DbKind) -> Result<Self> {
        Self::open(&connection::dsn_connection_string(dsn)?, kind)
    }

    pub fn open_with_options(
        connection_string: &str,
        kind: DbKind,
        options: BackendOptions,
    ) -> Result<Self> {
        let settings = Arc::new(ConnectionSettings::parse(connection_string, options)?);
        connection::apply_schema(&settings)?;
        info!(?kind, path = %settings.path().display(), "opening relational provenance store");

        let family = |stmts: &'static [&'static str]| -> Result<Mutex<OpConnection>> {
            Ok(Mutex::new(OpConnection::open(Arc::clone(&settings), stmts)?))
        };

        Ok(RelationalBackend {
            kind,
            create_session: family(schema::CREATE_SESSION_STMTS)?,
            create_object: family(schema::CREATE_OBJECT_STMTS)?,
            lookup_object: family(schema::LOOKUP_OBJECT_STMTS)?,
            lookup_objects: family(schema::LOOKUP_OBJECTS_STMTS)?,
            create_version: family(schema::CREATE_VERSION_STMTS)?,
            get_version: family(schema::GET_VERSION_STMTS)?,
            add_ancestry_edge: family(schema::ADD_ANCESTRY_EDGE_STMTS)?,
            has_immediate_ancestor: family(schema::HAS_IMMEDIATE_ANCESTOR_STMTS)?,
            add_property: family(schema::ADD_PROPERTY_STMTS)?,
            get_session_info: family(schema::GET_SESSION_INFO_STMTS)?,
            get_all_objects: family(schema::GET_ALL_OBJECTS_STMTS)?,
            get_object_info: family(schema::GET_OBJECT_INFO_STMTS)?,
            get_version_info: family(schema::GET_VERSION_INFO_STMTS)?,
            get_object_ancestry: family(schema::GET_OBJECT_ANCESTRY_STMTS)?,
            get_properties: family(schema::GET_PROPERTIES_STMTS)?,
            lookup_by_property: family(schema::LOOKUP_BY_PROPERTY_STMTS)?,
        })
    }

    /// The declared engine kind behind this store.
    pub fn kind(&self) -> DbKind {
        self.kind
    }

    #[cfg(test)]
    pub(crate) fn reconnect_all(&self) -> Result<()> {
        for family in [
            &self.create_session,
            &self.create_object,
            &self.lookup_object,
            &self.lookup_objects,
            &self.create_version,
            &self.get_version,
            &self.add_ancestry_edge,
            &self.has_immediate_ancestor,
            &self.add_property,
            &self.get_session_info,
            &self.get_all_objects,
            &self.get_object_info,
            &self.get_version_info,
            &self.get_object_ancestry,
            &self.get_properties,
            &self.lookup_by_property,
        ] {
            family.lock().reconnect()?;
        }
        Ok(())
    }
}

impl StorageBackend for RelationalBackend {
    fn close(self: Box<Self>) -> Result<()> {
        let backend = *self;
        let families = [
            ("create_session", backend.create_session),
            ("create_object", backend.create_object),
            ("lookup_object", backend.lookup_object),
            ("lookup_objects", backend.lookup_objects),
            ("create_version", backend.create_version),
            ("get_version", backend.get_version),
            ("add_ancestry_edge", backend.add_ancestry_edge),
            ("has_immediate_ancestor", backend.has_immediate_ancestor),
            ("add_property", backend.add_property),
            ("get_session_info", backend.get_session_info),
            ("get_all_objects", backend.get_all_objects),
            ("get_object_info", backend.get_object_info),
            ("get_version_info", backend.get_version_info),
            ("get_object_ancestry", backend.get_object_ancestry),
            ("get_properties", backend.get_properties),
            ("lookup_by_property", backend.lookup_by_property),
        ];
        for (name, family) in families {
            if let Err(e) = family.into_inner().close() {
                warn!(family = name, error = %e, "could not close connection");
            }
        }
        Ok(())
    }

    fn create_session(
        &self,
        session: SessionId,
        mac_address: Option<&str>,
        user: &str,
        pid: i32,
        program: &str,
        cmdline: &str,
    ) -> Result<()> {
        let mut conn = self.create_session.lock();
        conn.execute(OnConflict::Error, |c| {
            c.prepare_cached(schema::CREATE_SESSION_INSERT)?.execute(params![
                session.hi as i64,
                session.lo as i64,
                mac_address,
                user,
                pid,
                program,
                cmdline,
            ])
        })
    }

    fn create_object(
        &self,
        id: Id,
        originator: &str,
        name: &str,
        ty: &str,
        container: Option<(Id, Version)>,
        session: SessionId,
    ) -> Result<()> {
        let mut conn = self.create_object.lock();

        // An object row that is already present is reused: ids are
        // client-generated, so re-running a half-completed creation with
        // the same id must converge instead of failing.
        match container {
            Some((cid, cver)) => conn.execute(OnConflict::Ignore, |c| {
                c.prepare_cached(schema::CREATE_OBJECT_INSERT_CONTAINER)?
                    .execute(params![
                        id.hi as i64,
                        id.lo as i64,
                        originator,
                        name,
                        ty,
                        cid.hi as i64,
                        cid.lo as i64,
                        cver,
                    ])
            })?,
            None => conn.execute(OnConflict::Ignore, |c| {
                c.prepare_cached(schema::CREATE_OBJECT_INSERT)?.execute(params![
                    id.hi as i64,
                    id.lo as i64,
                    originator,
                    name,
                    ty,
                ])
            })?,
        }

        conn.execute(OnConflict::AlreadyExists, |c| {
            c.prepare_cached(schema::CREATE_OBJECT_INSERT_VERSION)?
                .execute(params![
                    id.hi as i64,
                    id.lo as i64,
                    session.hi as i64,
                    session.lo as i64,
                ])
        })
    }

    fn lookup_object(&self, originator: &str, name: &str, ty: &str) -> Result<Id> {
        let found = {
            let mut conn = self.lookup_object.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(schema::LOOKUP_OBJECT)?;
                let mut rows = stmt.query(params![originator, name, ty])?;
                match rows.next()? {
                    Some(r) => Ok(Some((r.get::<usize, i64>(0)?, r.get::<usize, i64>(1)?))),
                    None => Ok(None),
                }
            })?
        };
        let (hi, lo) = found.ok_or(CplError::NotFound)?;
        Ok(Id::new(hi as u64, lo as u64))
    }

    fn lookup_objects(
        &self,
        originator: &str,
        name: &str,
        ty: &str,
        _flags: u32,
        iterator: IdTimestampIter<'_>,
    ) -> Result<usize> {
        let rows = {
            let mut conn = self.lookup_objects.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(schema::LOOKUP_OBJECT_EXT)?;
                let mut rows = stmt.query(params![originator, name, ty])?;
                row::drain_rows(&mut rows, 3)
            })?
        };
        if rows.is_empty() {
            return Err(CplError::NotFound);
        }

        let mut delivered = 0;
        for rvals in &rows {
            let entry = IdTimestamp {
                id: Id::new(
                    row::value_u64(rvals, 0, NullPolicy::NotFound)?,
                    row::value_u64(rvals, 1, NullPolicy::NotFound)?,
                ),
                timestamp: row::value_timestamp(rvals, 2, NullPolicy::NotFound)?,
            };
            iterator(&entry)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn create_version(&self, id: Id, version: Version, session: SessionId) -> Result<()> {
        let mut conn = self.create_version.lock();
        conn.execute(OnConflict::AlreadyExists, |c| {
            c.prepare_cached(schema::CREATE_VERSION)?.execute(params![
                id.hi as i64,
                id.lo as i64,
                version,
                session.hi as i64,
                session.lo as i64,
            ])
        })
    }

    fn get_version(&self, id: Id) -> Result<Version> {
        let found = {
            let mut conn = self.get_version.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(schema::GET_VERSION)?;
                let mut rows = stmt.query(params![id.hi as i64, id.lo as i64])?;
                match rows.next()? {
                    Some(r) => Ok(Some(row::row_values(r, 1)?)),
                    None => Ok(None),
                }
            })?
        };
        // MAX() yields a single row whose aggregate is NULL when the
        // object has no versions.
        let rvals = found.ok_or(CplError::NotFound)?;
        let latest = row::value_i64(&rvals, 0, NullPolicy::NotFound)?;
        Ok(latest as Version)
    }

    fn add_ancestry_edge(
        &self,
        from: (Id, Version),
        to: (Id, Version),
        ty: DependencyType,
    ) -> Result<()> {
        let (from_id, from_version) = from;
        let (to_id, to_version) = to;
        let mut conn = self.add_ancestry_edge.lock();
        conn.execute(OnConflict::Error, |c| {
            c.prepare_cached(schema::ADD_ANCESTRY_EDGE)?.execute(params![
                from_id.hi as i64,
                from_id.lo as i64,
                from_version,
                to_id.hi as i64,
                to_id.lo as i64,
                to_version,
                ty.code(),
            ])
        })
    }

    fn has_immediate_ancestor(
        &self,
        object: Id,
        version_hint: Option<Version>,
        query: Id,
        query_max_version: Version,
    ) -> Result<bool> {
        let sql = match version_hint {
            Some(_) => schema::HAS_IMMEDIATE_ANCESTOR_WITH_VER,
            None => schema::HAS_IMMEDIATE_ANCESTOR,
        };
        let mut conn = self.has_immediate_ancestor.lock();
        conn.query(|c| {
            let mut stmt = c.prepare_cached(sql)?;
            let mut rows = match version_hint {
                Some(hint) => stmt.query(params![
                    object.hi as i64,
                    object.lo as i64,
                    query_max_version,
                    query.hi as i64,
                    query.lo as i64,
                    hint,
                ])?,
                None => stmt.query(params![
                    object.hi as i64,
                    object.lo as i64,
                    query_max_version,
                    query.hi as i64,
                    query.lo as i64,
                ])?,
            };
            Ok(rows.next()?.is_some())
        })
    }

    fn add_property(&self, id: Id, version: Version, key: &str, value: &str) -> Result<()> {
        let mut conn = self.add_property.lock();
        conn.execute(OnConflict::Error, |c| {
            c.prepare_cached(schema::ADD_PROPERTY)?.execute(params![
                id.hi as i64,
                id.lo as i64,
                version,
                key,
                value,
            ])
        })
    }

    fn get_session_info(&self, session: SessionId) -> Result<SessionInfo> {
        let found = {
            let mut conn = self.get_session_info.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(schema::GET_SESSION_INFO)?;
                let mut rows = stmt.query(params![session.hi as i64, session.lo as i64])?;
                match rows.next()? {
                    Some(r) => Ok(Some(row::row_values(r, 6)?)),
                    None => Ok(None),
                }
            })?
        };
        let rvals = found.ok_or(CplError::NotFound)?;
        Ok(SessionInfo {
            id: session,
            mac_address: row::optional(row::value_string(&rvals, 0, NullPolicy::Null))?,
            user: row::value_string(&rvals, 1, NullPolicy::NotFound)?,
            pid: row::value_i64(&rvals, 2, NullPolicy::NotFound)? as i32,
            program: row::value_string(&rvals, 3, NullPolicy::NotFound)?,
            cmdline: row::value_string(&rvals, 4, NullPolicy::NotFound)?,
            start_time: row::value_timestamp(&rvals, 5, NullPolicy::NotFound)?,
        })
    }

    fn get_all_objects(&self, flags: u32, iterator: ObjectInfoIter<'_>) -> Result<usize> {
        let with_session = flags & object_flags::NO_CREATION_SESSION == 0;
        let (sql, cols) = if with_session {
            (schema::GET_ALL_OBJECTS_WITH_SESSION, 11)
        } else {
            (schema::GET_ALL_OBJECTS, 9)
        };

        let rows = {
            let mut conn = self.get_all_objects.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(sql)?;
                let mut rows = stmt.query(params![])?;
                row::drain_rows(&mut rows, cols)
            })?
        };

        // The family lock is released: the per-row version lookups and the
        // callback below take locks of their own.
        let mut delivered = 0;
        for rvals in &rows {
            let id = Id::new(
                row::value_u64(rvals, 0, NullPolicy::NotFound)?,
                row::value_u64(rvals, 1, NullPolicy::NotFound)?,
            );
            let version = if flags & object_flags::NO_VERSION == 0 {
                Some(self.get_version(id)?)
            } else {
                None
            };
            let creation_session = if with_session {
                Some(Id::new(
                    row::value_u64(rvals, 9, NullPolicy::NotFound)?,
                    row::value_u64(rvals, 10, NullPolicy::NotFound)?,
                ))
            } else {
                None
            };
            let container_hi = row::optional(row::value_u64(rvals, 6, NullPolicy::Null))?;
            let container_lo = row::optional(row::value_u64(rvals, 7, NullPolicy::Null))?;
            let entry = ObjectInfo {
                id,
                version,
                creation_session,
                creation_time: row::value_timestamp(rvals, 2, NullPolicy::NotFound)?,
                originator: row::optional(row::value_string(rvals, 3, NullPolicy::Null))?
                    .unwrap_or_default(),
                name: row::optional(row::value_string(rvals, 4, NullPolicy::Null))?
                    .unwrap_or_default(),
                ty: row::optional(row::value_string(rvals, 5, NullPolicy::Null))?
                    .unwrap_or_default(),
                container_id: match (container_hi, container_lo) {
                    (Some(hi), Some(lo)) => Some(Id::new(hi, lo)),
                    _ => None,
                },
                container_version: row::optional(row::value_i64(rvals, 8, NullPolicy::Null))?
                    .map(|v| v as Version),
            };
            iterator(&entry)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn get_object_info(&self, id: Id, version_hint: Option<Version>) -> Result<ObjectInfo> {
        let version = match version_hint {
            Some(v) => v,
            None => self.get_version(id)?,
        };

        let found = {
            let mut conn = self.get_object_info.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(schema::GET_OBJECT_INFO)?;
                let mut rows = stmt.query(params![id.hi as i64, id.lo as i64])?;
                match rows.next()? {
                    Some(r) => Ok(Some(row::row_values(r, 9)?)),
                    None => Ok(None),
                }
            })?
        };
        let rvals = found.ok_or(CplError::NotFound)?;

        let container_hi = row::optional(row::value_u64(&rvals, 6, NullPolicy::Null))?;
        let container_lo = row::optional(row::value_u64(&rvals, 7, NullPolicy::Null))?;
        Ok(ObjectInfo {
            id,
            version: Some(version),
            creation_session: Some(Id::new(
                row::value_u64(&rvals, 0, NullPolicy::NotFound)?,
                row::value_u64(&rvals, 1, NullPolicy::NotFound)?,
            )),
            creation_time: row::value_timestamp(&rvals, 2, NullPolicy::NotFound)?,
            originator: row::optional(row::value_string(&rvals, 3, NullPolicy::Null))?
                .unwrap_or_default(),
            name: row::optional(row::value_string(&rvals, 4, NullPolicy::Null))?
                .unwrap_or_default(),
            ty: row::optional(row::value_string(&rvals, 5, NullPolicy::Null))?
                .unwrap_or_default(),
            container_id: match (container_hi, container_lo) {
                (Some(hi), Some(lo)) => Some(Id::new(hi, lo)),
                _ => None,
            },
            container_version: row::optional(row::value_i64(&rvals, 8, NullPolicy::Null))?
                .map(|v| v as Version),
        })
    }

    fn get_version_info(&self, id: Id, version: Version) -> Result<VersionInfo> {
        let found = {
            let mut conn = self.get_version_info.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(schema::GET_VERSION_INFO)?;
                let mut rows = stmt.query(params![id.hi as i64, id.lo as i64, version])?;
                match rows.next()? {
                    Some(r) => Ok(Some(row::row_values(r, 3)?)),
                    None => Ok(None),
                }
            })?
        };
        let rvals = found.ok_or(CplError::NotFound)?;
        Ok(VersionInfo {
            id,
            version,
            session: Id::new(
                row::value_u64(&rvals, 0, NullPolicy::NotFound)?,
                row::value_u64(&rvals, 1, NullPolicy::NotFound)?,
            ),
            creation_time: row::value_timestamp(&rvals, 2, NullPolicy::NotFound)?,
        })
    }

    fn get_object_ancestry(
        &self,
        id: Id,
        version: Option<Version>,
        direction: Direction,
        flags: u32,
        iterator: AncestryIter<'_>,
    ) -> Result<usize> {
        const SUPPORTED: u32 =
            ancestry_flags::NO_DATA_DEPENDENCIES | ancestry_flags::NO_CONTROL_DEPENDENCIES;
        if flags & !SUPPORTED != 0 {
            return Err(CplError::NotImplemented("unsupported ancestry flag"));
        }
        let no_data = flags & ancestry_flags::NO_DATA_DEPENDENCIES != 0;
        let no_control = flags & ancestry_flags::NO_CONTROL_DEPENDENCIES != 0;

        let sql = match (direction, version) {
            (Direction::Ancestors, None) => schema::GET_OBJECT_ANCESTORS,
            (Direction::Ancestors, Some(_)) => schema::GET_OBJECT_ANCESTORS_WITH_VER,
            (Direction::Descendants, None) => schema::GET_OBJECT_DESCENDANTS,
            (Direction::Descendants, Some(_)) => schema::GET_OBJECT_DESCENDANTS_WITH_VER,
        };

        let (found, edges) = {
            let mut conn = self.get_object_ancestry.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(sql)?;
                let mut rows = match version {
                    Some(v) => stmt.query(params![id.hi as i64, id.lo as i64, v])?,
                    None => stmt.query(params![id.hi as i64, id.lo as i64])?,
                };
                let mut found = false;
                let mut buf: Vec<(i64, i64, i64, i64, i64)> = Vec::new();
                while let Some(r) = rows.next()? {
                    found = true;
                    // NULL dependency types should not occur; skip them.
                    let ty: Option<i64> = r.get(4)?;
                    let Some(ty) = ty else { continue };
                    let category = DependencyType(ty as u32).category();
                    if no_data && category == Some(DependencyCategory::Data) {
                        continue;
                    }
                    if no_control && category == Some(DependencyCategory::Control) {
                        continue;
                    }
                    buf.push((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, ty));
                }
                Ok((found, buf))
            })?
        };

        // An empty result set is ambiguous when a specific version was
        // requested: probe whether the object exists at all.
        if !found && version.is_some() {
            self.get_version(id)?;
        }

        let mut delivered = 0;
        for (other_hi, other_lo, other_ver, query_ver, ty) in edges {
            let other = Id::new(other_hi as u64, other_lo as u64);
            let entry = match direction {
                Direction::Ancestors => AncestryEntry {
                    from_id: other,
                    from_version: other_ver as Version,
                    to_id: id,
                    to_version: query_ver as Version,
                    ty: DependencyType(ty as u32),
                },
                Direction::Descendants => AncestryEntry {
                    from_id: id,
                    from_version: query_ver as Version,
                    to_id: other,
                    to_version: other_ver as Version,
                    ty: DependencyType(ty as u32),
                },
            };
            iterator(&entry)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn get_properties(
        &self,
        id: Id,
        version: Option<Version>,
        key: Option<&str>,
        iterator: PropertyIter<'_>,
    ) -> Result<usize> {
        let sql = match (key, version) {
            (None, None) => schema::GET_PROPERTIES,
            (None, Some(_)) => schema::GET_PROPERTIES_WITH_VER,
            (Some(_), None) => schema::GET_PROPERTIES_WITH_KEY,
            (Some(_), Some(_)) => schema::GET_PROPERTIES_WITH_KEY_VER,
        };

        let rows = {
            let mut conn = self.get_properties.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(sql)?;
                let mut rows = match (key, version) {
                    (None, None) => stmt.query(params![id.hi as i64, id.lo as i64])?,
                    (None, Some(v)) => stmt.query(params![id.hi as i64, id.lo as i64, v])?,
                    (Some(k), None) => stmt.query(params![id.hi as i64, id.lo as i64, k])?,
                    (Some(k), Some(v)) => stmt.query(params![id.hi as i64, id.lo as i64, k, v])?,
                };
                row::drain_rows(&mut rows, 5)
            })?
        };

        let found = !rows.is_empty();
        let mut entries = Vec::new();
        for rvals in &rows {
            let key = row::optional(row::value_string(rvals, 3, NullPolicy::Null))?;
            let value = row::optional(row::value_string(rvals, 4, NullPolicy::Null))?;
            // NULL keys or values should not occur; skip such rows.
            let (Some(key), Some(value)) = (key, value) else {
                continue;
            };
            entries.push(PropertyEntry {
                id: Id::new(
                    row::value_u64(rvals, 0, NullPolicy::NotFound)?,
                    row::value_u64(rvals, 1, NullPolicy::NotFound)?,
                ),
                version: row::value_i64(rvals, 2, NullPolicy::NotFound)? as Version,
                key,
                value,
            });
        }

        if !found && version.is_some() {
            self.get_version(id)?;
        }

        let mut delivered = 0;
        for entry in &entries {
            iterator(entry)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn lookup_by_property(
        &self,
        key: &str,
        value: &str,
        iterator: PropertyIter<'_>,
    ) -> Result<usize> {
        let rows = {
            let mut conn = self.lookup_by_property.lock();
            conn.query(|c| {
                let mut stmt = c.prepare_cached(schema::LOOKUP_BY_PROPERTY)?;
                let mut rows = stmt.query(params![key, value])?;
                row::drain_rows(&mut rows, 3)
            })?
        };
        if rows.is_empty() {
            return Err(CplError::NotFound);
        }

        let mut delivered = 0;
        for rvals in &rows {
            let entry = PropertyEntry {
                id: Id::new(
                    row::value_u64(rvals, 0, NullPolicy::NotFound)?,
                    row::value_u64(rvals, 1, NullPolicy::NotFound)?,
                ),
                version: row::value_i64(rvals, 2, NullPolicy::NotFound)? as Version,
                key: key.to_owned(),
                value: value.to_owned(),
            };
            iterator(&entry)?;
            delivered += 1;
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RelationalBackend {
        let path = dir.path().join("prov.db");
        RelationalBackend::open(&format!("DSN={};", path.display()), DbKind::Generic)
            .expect("open backend")
    }

    fn session(backend: &RelationalBackend) -> SessionId {
        let sid = Id::new(0x5E55, 0x1);
        backend
            .create_session(sid, None, "tester", 1, "/bin/prov", "prov run")
            .expect("create session");
        sid
    }

    #[test]
    fn reconnect_keeps_results_stable() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir);
        let sid = session(&backend);

        let id = Id::new(1, 2);
        backend
            .create_object(id, "test", "A", "File", None, sid)
            .unwrap();
        backend.create_version(id, 1, sid).unwrap();
        assert_eq!(backend.get_version(id).unwrap(), 1);

        // Every family reopens its connection; prepared statements come
        // back through the fresh cache and results are unchanged.
        backend.reconnect_all().unwrap();
        assert_eq!(backend.get_version(id).unwrap(), 1);
        assert_eq!(backend.lookup_object("test", "A", "File").unwrap(), id);

        backend.create_version(id, 2, sid).unwrap();
        assert_eq!(backend.get_version(id).unwrap(), 2);
    }

    #[test]
    fn close_reports_ok() {
        let dir = TempDir::new().unwrap();
        let backend = Box::new(open(&dir));
        backend.close().unwrap();
    }

    #[test]
    fn informational_kind_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prov.db");
        let backend = RelationalBackend::open(
            &format!("DSN={};", path.display()),
            DbKind::PostgreSql,
        )
        .unwrap();
        assert_eq!(backend.kind(), DbKind::PostgreSql);
    }
}
