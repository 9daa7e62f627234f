//! Schema and the fixed prepared-statement set of the relational backend.
//!
//! Statements are grouped into families; each family is served by one
//! connection and serialized by one lock. The DDL is idempotent and runs
//! once when a backend opens.

/// Timestamp columns default to local wall-clock text; reads convert the
/// six date/time fields back to UNIX seconds.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cpl_sessions (
    id_hi               BIGINT NOT NULL,
    id_lo               BIGINT NOT NULL,
    mac_address         VARCHAR(18),
    username            VARCHAR(255) NOT NULL,
    pid                 INTEGER NOT NULL,
    program             VARCHAR(4095) NOT NULL,
    cmdline             VARCHAR(4095) NOT NULL,
    initialization_time TIMESTAMP NOT NULL DEFAULT (datetime('now', 'localtime')),
    PRIMARY KEY (id_hi, id_lo)
);

CREATE TABLE IF NOT EXISTS cpl_objects (
    id_hi            BIGINT NOT NULL,
    id_lo            BIGINT NOT NULL,
    originator       VARCHAR(255),
    name             VARCHAR(255),
    type             VARCHAR(100),
    creation_time    TIMESTAMP NOT NULL DEFAULT (datetime('now', 'localtime')),
    container_id_hi  BIGINT,
    container_id_lo  BIGINT,
    container_ver    INTEGER,
    PRIMARY KEY (id_hi, id_lo),
    FOREIGN KEY (container_id_hi, container_id_lo)
        REFERENCES cpl_objects (id_hi, id_lo)
);

CREATE TABLE IF NOT EXISTS cpl_versions (
    id_hi         BIGINT NOT NULL,
    id_lo         BIGINT NOT NULL,
    version       INTEGER NOT NULL,
    session_id_hi BIGINT NOT NULL,
    session_id_lo BIGINT NOT NULL,
    creation_time TIMESTAMP NOT NULL DEFAULT (datetime('now', 'localtime')),
    PRIMARY KEY (id_hi, id_lo, version),
    FOREIGN KEY (id_hi, id_lo) REFERENCES cpl_objects (id_hi, id_lo),
    FOREIGN KEY (session_id_hi, session_id_lo)
        REFERENCES cpl_sessions (id_hi, id_lo)
);

CREATE TABLE IF NOT EXISTS cpl_ancestry (
    from_id_hi   BIGINT NOT NULL,
    from_id_lo   BIGINT NOT NULL,
    from_version INTEGER NOT NULL,
    to_id_hi     BIGINT NOT NULL,
    to_id_lo     BIGINT NOT NULL,
    to_version   INTEGER NOT NULL,
    type         INTEGER,
    FOREIGN KEY (from_id_hi, from_id_lo, from_version)
        REFERENCES cpl_versions (id_hi, id_lo, version),
    FOREIGN KEY (to_id_hi, to_id_lo, to_version)
        REFERENCES cpl_versions (id_hi, id_lo, version)
);

CREATE TABLE IF NOT EXISTS cpl_properties (
    id_hi   BIGINT NOT NULL,
    id_lo   BIGINT NOT NULL,
    version INTEGER NOT NULL,
    name    VARCHAR(255) NOT NULL,
    value   VARCHAR(4095) NOT NULL,
    FOREIGN KEY (id_hi, id_lo, version)
        REFERENCES cpl_versions (id_hi, id_lo, version)
);

CREATE INDEX IF NOT EXISTS idx_cpl_objects_identity
    ON cpl_objects (originator, name, type);
CREATE INDEX IF NOT EXISTS idx_cpl_ancestry_to
    ON cpl_ancestry (to_id_hi, to_id_lo);
CREATE INDEX IF NOT EXISTS idx_cpl_ancestry_from
    ON cpl_ancestry (from_id_hi, from_id_lo);
CREATE INDEX IF NOT EXISTS idx_cpl_properties_object
    ON cpl_properties (id_hi, id_lo);
CREATE INDEX IF NOT EXISTS idx_cpl_properties_kv
    ON cpl_properties (name, value);
";

pub(crate) const CREATE_SESSION_INSERT: &str = "
    INSERT INTO cpl_sessions (id_hi, id_lo, mac_address, username, pid, program, cmdline)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

pub(crate) const CREATE_OBJECT_INSERT: &str = "
    INSERT INTO cpl_objects (id_hi, id_lo, originator, name, type)
    VALUES (?1, ?2, ?3, ?4, ?5)";

pub(crate) const CREATE_OBJECT_INSERT_CONTAINER: &str = "
    INSERT INTO cpl_objects (id_hi, id_lo, originator, name, type,
                             container_id_hi, container_id_lo, container_ver)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

pub(crate) const CREATE_OBJECT_INSERT_VERSION: &str = "
    INSERT INTO cpl_versions (id_hi, id_lo, version, session_id_hi, session_id_lo)
    VALUES (?1, ?2, 0, ?3, ?4)";

/// Identity collisions resolve to the latest creation time; equal
/// timestamps fall back to insertion order.
pub(crate) const LOOKUP_OBJECT: &str = "
    SELECT id_hi, id_lo
      FROM cpl_objects
     WHERE originator = ?1 AND name = ?2 AND type = ?3
     ORDER BY creation_time DESC, rowid DESC
     LIMIT 1";

pub(crate) const LOOKUP_OBJECT_EXT: &str = "
    SELECT id_hi, id_lo, creation_time
      FROM cpl_objects
     WHERE originator = ?1 AND name = ?2 AND type = ?3";

pub(crate) const CREATE_VERSION: &str = "
    INSERT INTO cpl_versions (id_hi, id_lo, version, session_id_hi, session_id_lo)
    VALUES (?1, ?2, ?3, ?4, ?5)";

pub(crate) const GET_VERSION: &str = "
    SELECT MAX(version)
      FROM cpl_versions
     WHERE id_hi = ?1 AND id_lo = ?2";

pub(crate) const ADD_ANCESTRY_EDGE: &str = "
    INSERT INTO cpl_ancestry (from_id_hi, from_id_lo, from_version,
                              to_id_hi, to_id_lo, to_version, type)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

pub(crate) const HAS_IMMEDIATE_ANCESTOR: &str = "
    SELECT to_version
      FROM cpl_ancestry
     WHERE to_id_hi = ?1 AND to_id_lo = ?2 AND to_version <= ?3
       AND from_id_hi = ?4 AND from_id_lo = ?5
     LIMIT 1";

pub(crate) const HAS_IMMEDIATE_ANCESTOR_WITH_VER: &str = "
    SELECT to_version
      FROM cpl_ancestry
     WHERE to_id_hi = ?1 AND to_id_lo = ?2 AND to_version <= ?3
       AND from_id_hi = ?4 AND from_id_lo = ?5 AND from_version <= ?6
     LIMIT 1";

pub(crate) const ADD_PROPERTY: &str = "
    INSERT INTO cpl_properties (id_hi, id_lo, version, name, value)
    VALUES (?1, ?2, ?3, ?4, ?5)";

pub(crate) const GET_SESSION_INFO: &str = "
    SELECT mac_address, username, pid, program, cmdline, initialization_time
      FROM cpl_sessions
     WHERE id_hi = ?1 AND id_lo = ?2
     LIMIT 1";

pub(crate) const GET_ALL_OBJECTS: &str = "
    SELECT id_hi, id_lo, creation_time, originator, name, type,
           container_id_hi, container_id_lo, container_ver
      FROM cpl_objects";

/// The creation session lives on the version-0 row.
pub(crate) const GET_ALL_OBJECTS_WITH_SESSION: &str = "
    SELECT cpl_objects.id_hi, cpl_objects.id_lo, cpl_objects.creation_time,
           originator, name, type,
           container_id_hi, container_id_lo, container_ver,
           session_id_hi, session_id_lo
      FROM cpl_objects
      JOIN cpl_versions ON cpl_objects.id_hi = cpl_versions.id_hi
                       AND cpl_objects.id_lo = cpl_versions.id_lo
     WHERE version = 0";

pub(crate) const GET_OBJECT_INFO: &str = "
    SELECT session_id_hi, session_id_lo, cpl_objects.creation_time,
           originator, name, type,
           container_id_hi, container_id_lo, container_ver
      FROM cpl_objects
      JOIN cpl_versions ON cpl_objects.id_hi = cpl_versions.id_hi
                       AND cpl_objects.id_lo = cpl_versions.id_lo
     WHERE cpl_objects.id_hi = ?1 AND cpl_objects.id_lo = ?2 AND version = 0
     LIMIT 1";

pub(crate) const GET_VERSION_INFO: &str = "
    SELECT session_id_hi, session_id_lo, creation_time
      FROM cpl_versions
     WHERE id_hi = ?1 AND id_lo = ?2 AND version = ?3
     LIMIT 1";

pub(crate) const GET_OBJECT_ANCESTORS: &str = "
    SELECT from_id_hi, from_id_lo, from_version, to_version, type
      FROM cpl_ancestry
     WHERE to_id_hi = ?1 AND to_id_lo = ?2";

pub(crate) const GET_OBJECT_ANCESTORS_WITH_VER: &str = "
    SELECT from_id_hi, from_id_lo, from_version, to_version, type
      FROM cpl_ancestry
     WHERE to_id_hi = ?1 AND to_id_lo = ?2 AND to_version = ?3";

pub(crate) const GET_OBJECT_DESCENDANTS: &str = "
    SELECT to_id_hi, to_id_lo, to_version, from_version, type
      FROM cpl_ancestry
     WHERE from_id_hi = ?1 AND from_id_lo = ?2";

pub(crate) const GET_OBJECT_DESCENDANTS_WITH_VER: &str = "
    SELECT to_id_hi, to_id_lo, to_version, from_version, type
      FROM cpl_ancestry
     WHERE from_id_hi = ?1 AND from_id_lo = ?2 AND from_version = ?3";

pub(crate) const GET_PROPERTIES: &str = "
    SELECT id_hi, id_lo, version, name, value
      FROM cpl_properties
     WHERE id_hi = ?1 AND id_lo = ?2";

pub(crate) const GET_PROPERTIES_WITH_VER: &str = "
    SELECT id_hi, id_lo, version, name, value
      FROM cpl_properties
     WHERE id_hi = ?1 AND id_lo = ?2 AND version = ?3";

pub(crate) const GET_PROPERTIES_WITH_KEY: &str = "
    SELECT id_hi, id_lo, version, name, value
      FROM cpl_properties
     WHERE id_hi = ?1 AND id_lo = ?2 AND name = ?3";

pub(crate) const GET_PROPERTIES_WITH_KEY_VER: &str = "
    SELECT id_hi, id_lo, version, name, value
      FROM cpl_properties
     WHERE id_hi = ?1 AND id_lo = ?2 AND name = ?3 AND version = ?4";

pub(crate) const LOOKUP_BY_PROPERTY: &str = "
    SELECT id_hi, id_lo, version
      FROM cpl_properties
     WHERE name = ?1 AND value = ?2";

/// Statement families, one per operation lock. A family's statements are
/// prepared once per connection and re-prepared after a reconnect.
pub(crate) const CREATE_SESSION_STMTS: &[&str] = &[CREATE_SESSION_INSERT];
pub(crate) const CREATE_OBJECT_STMTS: &[&str] = &[
    CREATE_OBJECT_INSERT,
    CREATE_OBJECT_INSERT_CONTAINER,
    CREATE_OBJECT_INSERT_VERSION,
];
pub(crate) const LOOKUP_OBJECT_STMTS: &[&str] = &[LOOKUP_OBJECT];
pub(crate) const LOOKUP_OBJECTS_STMTS: &[&str] = &[LOOKUP_OBJECT_EXT];
pub(crate) const CREATE_VERSION_STMTS: &[&str] = &[CREATE_VERSION];
pub(crate) const GET_VERSION_STMTS: &[&str] = &[GET_VERSION];
pub(crate) const ADD_ANCESTRY_EDGE_STMTS: &[&str] = &[ADD_ANCESTRY_EDGE];
pub(crate) const HAS_IMMEDIATE_ANCESTOR_STMTS: &[&str] =
    &[HAS_IMMEDIATE_ANCESTOR, HAS_IMMEDIATE_ANCESTOR_WITH_VER];
pub(crate) const ADD_PROPERTY_STMTS: &[&str] = &[ADD_PROPERTY];
pub(crate) const GET_SESSION_INFO_STMTS: &[&str] = &[GET_SESSION_INFO];
pub(crate) const GET_ALL_OBJECTS_STMTS: &[&str] = &[GET_ALL_OBJECTS, GET_ALL_OBJECTS_WITH_SESSION];
pub(crate) const GET_OBJECT_INFO_STMTS: &[&str] = &[GET_OBJECT_INFO];
pub(crate) const GET_VERSION_INFO_STMTS: &[&str] = &[GET_VERSION_INFO];
pub(crate) const GET_OBJECT_ANCESTRY_STMTS: &[&str] = &[
    GET_OBJECT_ANCESTORS,
    GET_OBJECT_ANCESTORS_WITH_VER,
    GET_OBJECT_DESCENDANTS,
    GET_OBJECT_DESCENDANTS_WITH_VER,
];
pub(crate) const GET_PROPERTIES_STMTS: &[&str] = &[
    GET_PROPERTIES,
    GET_PROPERTIES_WITH_VER,
    GET_PROPERTIES_WITH_KEY,
    GET_PROPERTIES_WITH_KEY_VER,
];
pub(crate) const LOOKUP_BY_PROPERTY_STMTS: &[&str] = &[LOOKUP_BY_PROPERTY];
