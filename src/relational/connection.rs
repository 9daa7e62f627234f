//! Connection management for the relational backend.
//!
//! Each statement family owns one engine connection. The connection is
//! configured and its statement set prepared when the backend opens; a
//! transient engine error tears the connection down, re-prepares, and the
//! operation retries, up to [`RECONNECT_RETRIES`] times.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{CplError, Result};
use crate::relational::schema;

/// Reconnect-and-retry attempts per operation on a transient engine error.
pub(crate) const RECONNECT_RETRIES: u32 = 3;

/// Declared database engine behind the connection string.
///
/// The tag is informational: the statement set sticks to portable SQL, so
/// it is recorded and logged but never consulted when building statements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbKind {
    #[default]
    Generic = 0,
    MySql = 1,
    PostgreSql = 2,
}

/// Tunables of the relational backend.
#[derive(Clone, Copy, Debug)]
pub struct BackendOptions {
    /// How long a statement waits on a busy database before the engine
    /// reports contention and the reconnect protocol takes over.
    pub busy_timeout: Duration,
    /// Prepared-statement cache capacity per connection. The largest
    /// statement family holds four statements.
    pub statement_cache_capacity: usize,
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions {
            busy_timeout: Duration::from_secs(1),
            statement_cache_capacity: 8,
        }
    }
}

/// Parsed connection string plus the options the backend was opened with.
///
/// The connection string is a `KEY=VALUE;` list. `DSN` names the database
/// file and is required; `MODE` is `rwc` (default) or `ro`; `TIMEOUT`
/// overrides the busy timeout in milliseconds.
#[derive(Debug)]
pub(crate) struct ConnectionSettings {
    path: PathBuf,
    read_only: bool,
    busy_timeout: Duration,
    cache_capacity: usize,
}

impl ConnectionSettings {
    pub(crate) fn parse(connection_string: &str, options: BackendOptions) -> Result<Self> {
        let mut path = None;
        let mut read_only = false;
        let mut busy_timeout = options.busy_timeout;

        for pair in connection_string.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                CplError::InvalidArgument(format!("malformed connection string entry {pair:?}"))
            })?;
            match key.trim().to_ascii_uppercase().as_str() {
                "DSN" => path = Some(PathBuf::from(value.trim())),
                "MODE" => match value.trim() {
                    "rwc" => read_only = false,
                    "ro" => read_only = true,
                    other => {
                        return Err(CplError::InvalidArgument(format!(
                            "unknown connection mode {other:?}"
                        )))
                    }
                },
                "TIMEOUT" => {
                    let ms: u64 = value.trim().parse().map_err(|_| {
                        CplError::InvalidArgument(format!("invalid TIMEOUT value {value:?}"))
                    })?;
                    busy_timeout = Duration::from_millis(ms);
                }
                other => {
                    return Err(CplError::InvalidArgument(format!(
                        "unknown connection string key {other:?}"
                    )))
                }
            }
        }

        let path = path.ok_or_else(|| {
            CplError::InvalidArgument("connection string is missing a DSN entry".into())
        })?;
        if path.as_os_str() == ":memory:" {
            // Every statement family opens its own connection; a private
            // in-memory database per family would not be one store.
            return Err(CplError::InvalidArgument(
                "the relational backend requires a file-backed database".into(),
            ));
        }

        Ok(ConnectionSettings {
            path,
            read_only,
            busy_timeout,
            cache_capacity: options.statement_cache_capacity,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn read_only(&self) -> bool {
        self.read_only
    }
}

/// Build the convenience connection string for a bare data source name.
/// The name may not contain `;`, `{`, or `}`: those would smuggle extra
/// entries or quoting into the connection string.
pub(crate) fn dsn_connection_string(dsn: &str) -> Result<String> {
    if dsn.contains([';', '{', '}']) {
        return Err(CplError::InvalidArgument(format!(
            "data source name {dsn:?} contains a reserved character"
        )));
    }
    Ok(format!("DSN={dsn};"))
}

/// Whether the engine error is transient contention that reconnecting and
/// retrying may clear. This is the single diagnostic the reconnect
/// protocol reacts to; everything else surfaces as a statement error.
pub(crate) fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(
                inner.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Whether the engine error is a primary-key or unique-index violation.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// How a unique-key violation from the engine is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OnConflict {
    /// Surface as a statement error.
    Error,
    /// Surface as `AlreadyExists`.
    AlreadyExists,
    /// Swallow; the row is already there.
    Ignore,
}

/// One statement family's connection.
pub(crate) struct OpConnection {
    conn: Connection,
    settings: Arc<ConnectionSettings>,
    statements: &'static [&'static str],
}

impl OpConnection {
    pub(crate) fn open(
        settings: Arc<ConnectionSettings>,
        statements: &'static [&'static str],
    ) -> Result<Self> {
        let conn = connect(&settings, statements)?;
        Ok(OpConnection {
            conn,
            settings,
            statements,
        })
    }

    /// Tear the connection down and bring up a fresh one with the family's
    /// statements re-prepared.
    pub(crate) fn reconnect(&mut self) -> Result<()> {
        info!(path = %self.settings.path().display(), "reconnecting statement family");
        self.conn = connect(&self.settings, self.statements)?;
        Ok(())
    }

    /// Run a mutating statement, retrying through reconnects on transient
    /// engine errors.
    pub(crate) fn execute(
        &mut self,
        on_conflict: OnConflict,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<usize>,
    ) -> Result<()> {
        let mut retries_left = RECONNECT_RETRIES;
        loop {
            match f(&self.conn) {
                Ok(_) => return Ok(()),
                Err(e) if is_transient(&e) && retries_left > 0 => {
                    retries_left -= 1;
                    warn!(error = %e, retries_left, "transient engine error, reconnecting");
                    self.reconnect()?;
                }
                Err(e) if is_unique_violation(&e) => {
                    return match on_conflict {
                        OnConflict::Error => {
                            error!(error = %e, "statement failed");
                            Err(e.into())
                        }
                        OnConflict::AlreadyExists => Err(CplError::AlreadyExists),
                        OnConflict::Ignore => {
                            debug!(error = %e, "row already present, continuing");
                            Ok(())
                        }
                    };
                }
                Err(e) => {
                    error!(error = %e, "statement failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Run a query, retrying through reconnects on transient engine
    /// errors. The closure binds, executes, and drains the cursor; it runs
    /// from scratch on every attempt.
    pub(crate) fn query<T>(
        &mut self,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut retries_left = RECONNECT_RETRIES;
        loop {
            match f(&self.conn) {
                Ok(v) => return Ok(v),
                Err(e) if is_transient(&e) && retries_left > 0 => {
                    retries_left -= 1;
                    warn!(error = %e, retries_left, "transient engine error, reconnecting");
                    self.reconnect()?;
                }
                Err(e) => {
                    error!(error = %e, "statement failed");
                    return Err(e.into());
                }
            }
        }
    }

    pub(crate) fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| CplError::Connection(e.to_string()))
    }
}

fn connect(
    settings: &ConnectionSettings,
    statements: &'static [&'static str],
) -> Result<Connection> {
    let flags = if settings.read_only() {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(settings.path(), flags)
        .map_err(|e| CplError::Connection(e.to_string()))?;
    configure(&conn, settings)?;
    conn.set_prepared_statement_cache_capacity(settings.cache_capacity);
    for sql in statements {
        conn.prepare_cached(sql)
            .map_err(|e| CplError::PrepareStatement(e.to_string()))?;
    }
    Ok(conn)
}

fn configure(conn: &Connection, settings: &ConnectionSettings) -> Result<()> {
    conn.busy_timeout(settings.busy_timeout)
        .map_err(|e| CplError::Connection(e.to_string()))?;
    if !settings.read_only() {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CplError::Connection(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| CplError::Connection(e.to_string()))?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| CplError::Connection(e.to_string()))?;
    Ok(())
}

/// Create the schema before the statement families come up. A read-only
/// store expects the schema to exist already.
pub(crate) fn apply_schema(settings: &ConnectionSettings) -> Result<()> {
    if settings.read_only() {
        debug!("read-only mode, skipping schema creation");
        return Ok(());
    }
    let conn = connect(settings, &[])?;
    conn.execute_batch(schema::SCHEMA)?;
    Ok(())
}
